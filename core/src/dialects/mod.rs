//! Concrete wire dialects (spec §4.D dispatch table). Each module owns a
//! request parser, a response parser, and the `pre_splitcopy`/
//! `post_splitcopy` hooks the fragmentation engine (§4.I) calls through for
//! that dialect.
//!
//! These are a minimal, spec-sufficient grammar, not a complete
//! implementation of either wire protocol (SPEC_FULL.md §5 non-goals): just
//! enough request/response shape to drive the receive, send, and
//! fragmentation engines end to end.

pub mod internal;
pub mod memcache;
pub mod redis;

//! A small demonstration runner: feeds a pipelined Redis `mget` through
//! `dynocore::Core` over an `InMemoryConn` and prints the resulting
//! fragment group, the way the teacher's `elvis` bin prints a finished
//! simulation's outcome.

use dynocore::clock::SystemClock;
use dynocore::conn::Role;
use dynocore::decrypt::XorCipher;
use dynocore::id::ConnId;
use dynocore::msg::{Dialect, Direction, Mode};
use dynocore::{Core, CoreConfig};

use dynocore_harness::InMemoryConn;

fn main() {
    tracing_subscriber::fmt().with_target(true).init();

    let mut core = Core::new(CoreConfig::default(), XorCipher, SystemClock::new())
        .expect("default config is valid");

    let handle = core
        .msgs
        .get(ConnId(1), Mode::External, Direction::Request, Dialect::Redis)
        .expect("pool has headroom");

    let mut conn = InMemoryConn::new(ConnId(1), Mode::External, Role::Client, Dialect::Redis);
    conn.set_current(handle);
    conn.feed(b"*4\r\n$4\r\nmget\r\n$4\r\nkey1\r\n$4\r\nkey2\r\n$4\r\nkey3\r\n");

    core.recv(&mut conn).expect("well-formed request parses cleanly");

    println!("dynocore-harness v{}", env!("CARGO_PKG_VERSION"));
    println!("fragments completed: {}", conn.recv_completed().len());
    for (msg, next) in conn.recv_completed() {
        let frag = core.msgs.get_msg(*msg).and_then(|m| m.frag);
        println!("  {msg:?} -> next={next:?} frag={frag:?}");
    }
}

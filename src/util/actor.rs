//! Convenience functions for working with actors in actix.

use actix::prelude::*;

/// Send a message, without regard for whether the target will receive it.
/// See `actix::Addr::do_send`.
pub fn send_unconditionally<A, M>(addr: &Addr<A>, message: M)
where
    M: Message + Send + 'static,
    M::Result: Send,
    A: Actor + Handler<M>,
    A::Context: actix::dev::ToEnvelope<A, M>,
{
    addr.do_send(message)
}

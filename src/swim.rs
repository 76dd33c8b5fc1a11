use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::thread;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::id::MemberId;
use crate::network::InboundMessage;
use crate::node::SwimNode;

/// Runs one member on its own thread until cancelled, then hands the node back.
///
/// Inbound messages are drained in arrival order between ticks, one at a time, so the
/// node's state is only ever touched from this thread.
pub fn start_swim_member(mut node: SwimNode,
                         introducer: MemberId,
                         receiver: Receiver<InboundMessage>,
                         cancellation_token: CancellationToken) -> JoinHandle<SwimNode> {
    let protocol_period = node.config().protocol_period;
    return thread::spawn(move || {
        node.start(introducer);
        run_member_loop(&mut node, &receiver, protocol_period, &cancellation_token);
        node
    });
}

fn run_member_loop(node: &mut SwimNode,
                   receiver: &Receiver<InboundMessage>,
                   protocol_period: Duration,
                   cancellation_token: &CancellationToken) {
    let mut next_tick = Instant::now() + protocol_period;
    loop {
        if cancellation_token.is_cancelled() {
            log::debug!("[{}] member loop will be stopped", node.id());
            break;
        }
        let now = Instant::now();
        if now >= next_tick {
            node.tick();
            next_tick += protocol_period;
            continue;
        }
        match receiver.recv_timeout(next_tick - now) {
            Ok(inbound) => node.handle_message(inbound),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                log::debug!("[{}] inbound channel closed", node.id());
                break;
            }
        }
    }
}

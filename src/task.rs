use crate::channel::Subscription;
use crate::commands::CallCommand;
use crate::controller::CallController;
use crate::peer::state::CallPhase;
use crate::session::{CallId, CallSession, CallStatus};
use serde_json::Value;
use std::future::pending;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Drives one controller until the call is finished.
///
/// All inputs are serialized through a single `select!`, so the controller
/// sees one event at a time. Local commands are polled first. The record
/// watch follows whatever call id the controller currently holds.
pub async fn run(
    mut controller: CallController,
    mut signals: Subscription<Value>,
    mut commands: mpsc::UnboundedReceiver<CallCommand>,
) {
    let Some(mut peer_events) = controller.take_peer_events() else {
        error!("peer event receiver already taken");
        return;
    };
    let topic = controller.binding().topic.clone();
    let period = controller.config().tick_interval;
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut watched: Option<CallId> = None;
    let mut status: Option<Subscription<CallSession>> = None;
    let mut last_phase = controller.phase();
    info!(%topic, "call task started");

    while !controller.is_finished() {
        if controller.call_id() != watched.as_ref() {
            watched = controller.call_id().cloned();
            status = watch(&controller, watched.as_ref()).await;
            if catch_up(&mut controller, watched.as_ref()).await {
                continue;
            }
        }

        let phase = controller.phase();
        if phase != last_phase {
            if phase == CallPhase::Active {
                ticker.reset();
            }
            last_phase = phase;
        }
        let watchdog = controller.watchdog();

        tokio::select! {
            biased;

            command = commands.recv() => match command {
                Some(command) => execute(&mut controller, command).await,
                None => {
                    debug!(%topic, "call handle dropped");
                    controller.close().await;
                }
            },
            raw = signals.recv() => match raw {
                Some(raw) => controller.handle_raw_signal(raw).await,
                None => {
                    warn!(%topic, "signaling subscription closed");
                    controller.close().await;
                }
            },
            Some(session) = next_status(&mut status) => controller.on_status_change(session).await,
            Some(event) = peer_events.recv() => controller.on_peer_event(event).await,
            _ = ticker.tick(), if phase == CallPhase::Active => controller.tick(),
            _ = time::sleep_until(watchdog.unwrap_or_else(Instant::now)), if watchdog.is_some() => {
                controller.on_watchdog().await
            }
        }
    }

    drop(status);
    drop(signals);
    info!(%topic, "call task finished");
}

async fn watch(
    controller: &CallController,
    id: Option<&CallId>,
) -> Option<Subscription<CallSession>> {
    let id = id?;
    match controller.backend().store.watch_call(id).await {
        Ok(subscription) => Some(subscription),
        Err(e) => {
            warn!(call_id = %id, error = %e, "call record watch unavailable");
            None
        }
    }
}

/// Applies a status change that landed before the watch existed.
async fn catch_up(controller: &mut CallController, id: Option<&CallId>) -> bool {
    let Some(id) = id else {
        return false;
    };
    match controller.backend().store.get(id).await {
        Ok(Some(session)) if session.status != CallStatus::Ringing => {
            controller.on_status_change(session).await;
            true
        }
        Ok(_) => false,
        Err(e) => {
            warn!(call_id = %id, error = %e, "call record lookup failed");
            false
        }
    }
}

/// Next record update; pending forever when nothing is watched.
async fn next_status(status: &mut Option<Subscription<CallSession>>) -> Option<CallSession> {
    let Some(subscription) = status.as_mut() else {
        return pending().await;
    };
    let update = subscription.recv().await;
    if update.is_none() {
        debug!("call record watch closed");
        *status = None;
    }
    update
}

async fn execute(controller: &mut CallController, command: CallCommand) {
    match command {
        CallCommand::Dial(reply) => {
            let _ = reply.send(controller.start_call().await);
        }
        CallCommand::Accept(reply) => {
            let _ = reply.send(controller.accept().await);
        }
        CallCommand::Reject(reply) => {
            let _ = reply.send(controller.reject().await);
        }
        CallCommand::HangUp(reply) => {
            let _ = reply.send(controller.hang_up().await);
        }
        CallCommand::ToggleMute(reply) => {
            let _ = reply.send(controller.toggle_mute());
        }
        CallCommand::Snapshot(reply) => {
            let _ = reply.send(controller.snapshot());
        }
        CallCommand::Microphone(reply) => {
            let _ = reply.send(controller.state().capture().cloned());
        }
    }
}

use std::time::Duration;

use tokio::sync::mpsc;
use vbft_consensus_core::height::{Height, View};

use super::{EventTimer, TimerKind};
use crate::config::ConsensusConfig;
use crate::event::Event;

fn timer() -> (EventTimer, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(16);
    let config = ConsensusConfig::default();
    (
        EventTimer::new(config.timer_delays(), config.max_view_backoff_exp, tx),
        rx,
    )
}

async fn next_timer_event(
    rx: &mut mpsc::Receiver<Event>,
    wait: Duration,
) -> Option<super::TimerEvent> {
    match tokio::time::timeout(wait, rx.recv()).await {
        Ok(Some(Event::Timer(event))) => Some(event),
        _ => None,
    }
}

#[test_log::test(tokio::test(flavor = "current_thread", start_paused = true))]
async fn timer_fires_once() {
    let (mut timer, mut rx) = timer();

    timer.start_timer(Height::from(1), Duration::from_millis(10));

    let event = next_timer_event(&mut rx, Duration::from_secs(1))
        .await
        .expect("timer fired");
    assert_eq!(event.kind, TimerKind::Round);
    assert_eq!(event.round, Height::from(1));
    assert!(timer.accept(&event));
    assert!(!timer.accept(&event));

    assert!(next_timer_event(&mut rx, Duration::from_secs(10)).await.is_none());
}

#[test_log::test(tokio::test(flavor = "current_thread", start_paused = true))]
async fn cancelled_timer_is_never_observed() {
    let (mut timer, mut rx) = timer();

    timer.start_timer(Height::from(1), Duration::from_millis(10));
    timer.cancel_timer(Height::from(1));

    assert!(next_timer_event(&mut rx, Duration::from_secs(10)).await.is_none());
    assert!(!timer.is_armed(TimerKind::Round, Height::from(1)));
}

#[test_log::test(tokio::test(flavor = "current_thread", start_paused = true))]
async fn event_of_timer_cancelled_after_firing_is_rejected() {
    let (mut timer, mut rx) = timer();

    timer.start_timer(Height::from(1), Duration::from_millis(10));
    // Let the task fire and enqueue its event
    tokio::time::sleep(Duration::from_millis(50)).await;
    timer.cancel_timer(Height::from(1));

    let event = next_timer_event(&mut rx, Duration::from_secs(1))
        .await
        .expect("already enqueued");
    assert!(!timer.accept(&event));
}

#[test_log::test(tokio::test(flavor = "current_thread", start_paused = true))]
async fn restarting_replaces_the_timer() {
    let (mut timer, mut rx) = timer();

    timer.start_timer(Height::from(1), Duration::from_millis(10));
    timer.start_timer(Height::from(1), Duration::from_secs(5));

    assert!(next_timer_event(&mut rx, Duration::from_secs(1)).await.is_none());

    let event = next_timer_event(&mut rx, Duration::from_secs(10))
        .await
        .expect("replacement fired");
    assert!(timer.accept(&event));
}

#[test_log::test(tokio::test(flavor = "current_thread", start_paused = true))]
async fn past_rounds_are_ignored_and_cancelled() {
    let (mut timer, mut rx) = timer();

    timer
        .start_event_timer(TimerKind::ProposeBlock, Height::from(1), View::ZERO)
        .expect("known kind");
    timer.set_current_round(Height::from(2));
    assert!(!timer.is_armed(TimerKind::ProposeBlock, Height::from(1)));

    timer.start_timer(Height::from(1), Duration::from_millis(10));
    assert!(!timer.is_armed(TimerKind::Round, Height::from(1)));

    assert!(next_timer_event(&mut rx, Duration::from_secs(60)).await.is_none());
}

#[test_log::test(tokio::test(flavor = "current_thread", start_paused = true))]
async fn view_backoff_delays_timeouts() {
    let (mut timer, mut rx) = timer();
    let base = ConsensusConfig::default().propose_timeout;

    timer
        .start_event_timer(TimerKind::ProposeBlock, Height::from(1), View::from(2))
        .expect("known kind");

    // 4x the base delay for view 2
    assert!(next_timer_event(&mut rx, base * 3).await.is_none());
    let event = next_timer_event(&mut rx, base * 2)
        .await
        .expect("fired");
    assert_eq!(event.view, View::from(2));
}

#[test_log::test(tokio::test(flavor = "current_thread", start_paused = true))]
async fn unknown_kind_is_an_error() {
    let (tx, _rx) = mpsc::channel(1);
    let mut timer = EventTimer::new(Default::default(), 0, tx);

    assert!(
        timer
            .start_event_timer(TimerKind::ChangeView, Height::from(1), View::ZERO)
            .is_err()
    );
}

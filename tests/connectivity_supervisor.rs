mod common;

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use slide_frame::config::ConnectivityConfig;
use slide_frame::connectivity::{ConnectivityState, Supervisor, SupervisorAction};
use slide_frame::settings::Credentials;
use tokio::time::advance;

use common::{FakeStack, JOINED_ADDRESS};

fn config() -> ConnectivityConfig {
    ConnectivityConfig {
        join_attempts: 3,
        join_poll_interval: Duration::from_millis(500),
        fallback_timeout: Duration::from_secs(60),
        ..ConnectivityConfig::default()
    }
}

fn home() -> Credentials {
    Credentials {
        ssid: "Home".into(),
        secret: "password1".into(),
    }
}

#[tokio::test(start_paused = true)]
async fn empty_credentials_go_straight_to_fallback() {
    let stack = Arc::new(FakeStack::connects_on_join(1));
    let mut supervisor = Supervisor::new(Arc::clone(&stack), config(), Credentials::default());

    assert_eq!(supervisor.start().await, ConnectivityState::HostingFallback);
    assert_eq!(stack.joins(), 0);
    let aps = stack.access_points();
    assert_eq!(aps.len(), 1);
    assert_eq!(aps[0].ssid, "PhotoFrame-A1B2C3");
    assert_eq!(aps[0].password, "photoframe");
    assert_eq!(aps[0].address, Ipv4Addr::new(192, 168, 4, 1));
    assert_eq!(supervisor.address(), Some(Ipv4Addr::new(192, 168, 4, 1)));

    // Nothing to retry without credentials.
    advance(Duration::from_secs(600)).await;
    assert_eq!(supervisor.poll().await, SupervisorAction::Continue);
    assert_eq!(stack.joins(), 0);
}

#[tokio::test(start_paused = true)]
async fn successful_join_is_terminal() {
    let stack = Arc::new(FakeStack::connects_on_join(1));
    let mut supervisor = Supervisor::new(Arc::clone(&stack), config(), home());

    assert_eq!(supervisor.start().await, ConnectivityState::Joined);
    assert_eq!(supervisor.joined_ssid(), Some("Home"));
    assert_eq!(supervisor.address(), Some(JOINED_ADDRESS));
    assert!(stack.access_points().is_empty());
    assert_eq!(stack.joined_with(), vec![home()]);

    advance(Duration::from_secs(3600)).await;
    assert_eq!(supervisor.poll().await, SupervisorAction::Continue);
    assert_eq!(stack.joins(), 1);
}

#[tokio::test(start_paused = true)]
async fn exhausted_attempts_fall_back() {
    let stack = Arc::new(FakeStack::never_connects());
    let mut supervisor = Supervisor::new(Arc::clone(&stack), config(), home());

    let started = tokio::time::Instant::now();
    assert_eq!(supervisor.start().await, ConnectivityState::HostingFallback);
    assert_eq!(stack.joins(), 1);
    assert_eq!(stack.polls(), 3);
    // Two sleeps between three polls.
    assert_eq!(started.elapsed(), Duration::from_millis(1000));
    assert_eq!(supervisor.joined_ssid(), None);
    assert_eq!(stack.access_points().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn fallback_timeout_triggers_exactly_one_retry() {
    let stack = Arc::new(FakeStack::never_connects());
    let mut supervisor = Supervisor::new(Arc::clone(&stack), config(), home());
    supervisor.start().await;
    assert_eq!(stack.joins(), 1);

    assert_eq!(supervisor.poll().await, SupervisorAction::Continue);
    assert_eq!(stack.joins(), 1, "no retry before the timeout");

    advance(Duration::from_secs(60)).await;
    assert_eq!(supervisor.poll().await, SupervisorAction::Continue);
    assert_eq!(stack.joins(), 2);
    assert_eq!(supervisor.state(), ConnectivityState::HostingFallback);

    for _ in 0..10 {
        assert_eq!(supervisor.poll().await, SupervisorAction::Continue);
    }
    assert_eq!(stack.joins(), 2, "failed retry must not loop");
    assert_eq!(stack.access_points().len(), 2, "access point restored");
}

#[tokio::test(start_paused = true)]
async fn successful_retry_requests_restart() {
    let stack = Arc::new(FakeStack::connects_on_join(2));
    let mut supervisor = Supervisor::new(Arc::clone(&stack), config(), home());
    assert_eq!(supervisor.start().await, ConnectivityState::HostingFallback);

    advance(Duration::from_secs(61)).await;
    assert_eq!(supervisor.poll().await, SupervisorAction::Restart);
    assert_eq!(stack.joins(), 2);
}

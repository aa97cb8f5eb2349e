//! End-to-end bootstrap flow: a data directory, a signed-in user, a
//! started session surviving a reconnect.

use focusteam::models::SessionKind;
use focusteam::timer::TimerPhase;
use focusteam::{App, AuthUser};

fn alice() -> AuthUser {
    AuthUser {
        id: "alice".into(),
        name: "Alice".into(),
        email: "alice@example.com".into(),
        avatar_url: None,
    }
}

#[tokio::test]
async fn started_session_survives_a_reconnect() {
    let data_dir = std::env::temp_dir().join(format!("focusteam-test-{}", uuid::Uuid::new_v4()));
    let app = App::bootstrap(&data_dir).unwrap();

    let (_ctx, engine) = app.connect_user(alice()).await.unwrap();
    let started = engine.start().await.unwrap();
    let session_id = started.state.session_id.clone().unwrap();

    // A new engine (fresh client) restores the same session from the
    // profile pointer.
    let (_ctx, engine) = app.connect_user(alice()).await.unwrap();
    let snapshot = engine.snapshot().await;
    assert_eq!(snapshot.state.phase, TimerPhase::Active);
    assert_eq!(snapshot.state.kind, SessionKind::Work);
    assert_eq!(snapshot.state.session_id.as_deref(), Some(session_id.as_str()));
    assert!(snapshot.remaining_secs > 0 && snapshot.remaining_secs <= 1500);

    engine.stop().await.unwrap();
    let snapshot = engine.snapshot().await;
    assert_eq!(snapshot.state.phase, TimerPhase::Idle);

    drop(app);
    let _ = std::fs::remove_dir_all(&data_dir);
}

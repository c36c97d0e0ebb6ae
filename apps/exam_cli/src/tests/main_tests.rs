use super::*;
use shared::error::ApiError;

#[test]
fn only_a_refused_token_clears_the_session() {
    let refused = anyhow::Error::from(ClientError::from(ApiError::new(401, "token expired")));
    let forbidden = anyhow::Error::from(ClientError::from(ApiError::new(403, "not yours")));
    let missing = anyhow::Error::from(ClientError::NotLoggedIn);
    let plain = anyhow::anyhow!("could not start exam 7");

    assert!(credentials_rejected(&refused));
    assert!(!credentials_rejected(&forbidden));
    assert!(!credentials_rejected(&missing));
    assert!(!credentials_rejected(&plain));
}

#[test]
fn take_ending_on_a_refused_token_clears_the_session() {
    let (cmd_tx, _cmd_rx) = tokio::sync::mpsc::channel(4);
    let mut state = take::TakeState::new(ExamId(7), shared::domain::UserId(2));
    let mut status = None;
    state.handle_event(
        client_core::AttemptEvent::LoadFailed(client_core::attempt::AttemptFailure {
            category: client_core::ErrorCategory::Forbidden,
            message: "You do not have access to this exam.".to_string(),
            detail: "unauthorized".to_string(),
            requires_reauth: true,
        }),
        &cmd_tx,
        &mut status,
    );

    let err = take::finish(&state, client_core::AttemptPhase::Error, ExamId(7))
        .expect_err("refused token");
    assert!(credentials_rejected(&err));
}

use async_trait::async_trait;
use avatar_relay_speech::{
    AvatarSessionConfig, AvatarSessions, AvatarVideoFormat, CancellationReason, ConnectRequest,
    IceToken, SessionLimits, SpeechError, SynthesisConnection, SynthesisConnector,
    SynthesisOutcome, SynthesisResult,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const TURN_START: &str = r#"{"webrtc":{"connectionString":"remote-answer-sdp"}}"#;

struct FakeConnection {
    turn_start: Option<String>,
    negotiation: SynthesisOutcome,
    closed: Arc<AtomicBool>,
    turns: AtomicUsize,
}

#[async_trait]
impl SynthesisConnection for FakeConnection {
    async fn speak_text(&self, text: &str) -> Result<SynthesisResult, SpeechError> {
        assert!(text.is_empty(), "negotiation uses an empty text turn");
        Ok(SynthesisResult {
            result_id: "negotiation".to_string(),
            outcome: self.negotiation.clone(),
        })
    }

    async fn speak_ssml(&self, _ssml: &str) -> Result<SynthesisResult, SpeechError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SpeechError::NotConnected);
        }
        let n = self.turns.fetch_add(1, Ordering::SeqCst);
        Ok(SynthesisResult::completed(format!("turn-{n}")))
    }

    fn turn_start_message(&self) -> Option<String> {
        self.turn_start.clone()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<(), SpeechError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct FakeConnector {
    turn_start: Option<String>,
    negotiation: SynthesisOutcome,
    opened: Mutex<Vec<AvatarSessionConfig>>,
    closed_flags: Mutex<Vec<Arc<AtomicBool>>>,
    refuse: AtomicBool,
}

impl FakeConnector {
    fn new() -> Self {
        Self {
            turn_start: Some(TURN_START.to_string()),
            negotiation: SynthesisOutcome::Completed,
            opened: Mutex::new(Vec::new()),
            closed_flags: Mutex::new(Vec::new()),
            refuse: AtomicBool::new(false),
        }
    }

    fn opened(&self) -> usize {
        self.opened.lock().unwrap().len()
    }

    fn closed(&self, index: usize) -> bool {
        self.closed_flags.lock().unwrap()[index].load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SynthesisConnector for FakeConnector {
    async fn open(
        &self,
        context: &AvatarSessionConfig,
    ) -> Result<Box<dyn SynthesisConnection>, SpeechError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(SpeechError::Transport("connection refused".to_string()));
        }
        self.opened.lock().unwrap().push(context.clone());
        let closed = Arc::new(AtomicBool::new(false));
        self.closed_flags.lock().unwrap().push(Arc::clone(&closed));
        Ok(Box::new(FakeConnection {
            turn_start: self.turn_start.clone(),
            negotiation: self.negotiation.clone(),
            closed,
            turns: AtomicUsize::new(0),
        }))
    }
}

fn token() -> IceToken {
    IceToken {
        urls: vec!["turn:relay.example.com:3478".to_string()],
        username: "relay-user".to_string(),
        password: "relay-pass".to_string(),
    }
}

fn request() -> ConnectRequest {
    ConnectRequest {
        local_sdp: "local-offer".to_string(),
        character: Some("lisa".to_string()),
        style: Some("casual-sitting".to_string()),
        background_color: Some("#FFFFFFFF".to_string()),
    }
}

fn registry(connector: &Arc<FakeConnector>) -> AvatarSessions {
    AvatarSessions::new(
        Arc::clone(connector) as Arc<dyn SynthesisConnector>,
        AvatarVideoFormat::default(),
        "test-secret",
    )
}

#[tokio::test]
async fn connect_without_ice_token_fails() {
    let connector = Arc::new(FakeConnector::new());
    let sessions = registry(&connector);

    let result = sessions.connect(request()).await;
    assert!(matches!(result, Err(SpeechError::MissingIceToken)));
    assert_eq!(connector.opened(), 0);
}

#[tokio::test]
async fn speak_before_connect_is_not_connected() {
    let connector = Arc::new(FakeConnector::new());
    let sessions = registry(&connector);

    let result = sessions.speak(None, "<speak/>").await;
    assert!(matches!(result, Err(SpeechError::NotConnected)));
    let result = sessions.disconnect(None).await;
    assert!(matches!(result, Err(SpeechError::NotConnected)));
}

#[tokio::test]
async fn connect_builds_config_and_returns_remote_description() {
    let connector = Arc::new(FakeConnector::new());
    let sessions = registry(&connector);
    sessions.store_ice_token(token());

    let connected = sessions.connect(request()).await.unwrap();
    assert_eq!(connected.remote_sdp, "remote-answer-sdp");
    assert_eq!(connected.result_id, "negotiation");
    assert_eq!(sessions.session_count(), 1);

    let opened = connector.opened.lock().unwrap();
    let video = &opened[0].synthesis.video;
    assert_eq!(video.protocol.webrtc_config.client_description, "local-offer");
    assert_eq!(
        video.protocol.webrtc_config.ice_servers[0].urls,
        vec!["turn:relay.example.com:3478".to_string()]
    );
    assert_eq!(video.protocol.webrtc_config.ice_servers[0].credential, "relay-pass");
    assert_eq!(video.talking_avatar.character.as_deref(), Some("lisa"));
    assert_eq!(video.format.bitrate, 2_000_000);
}

#[tokio::test]
async fn disconnect_closes_session_and_later_speak_fails() {
    let connector = Arc::new(FakeConnector::new());
    let sessions = registry(&connector);
    sessions.store_ice_token(token());

    let connected = sessions.connect(request()).await.unwrap();
    let handle = connected.session_id.as_str();

    assert_eq!(sessions.speak(Some(handle), "<speak/>").await.unwrap(), "turn-0");
    assert_eq!(sessions.speak(None, "<speak/>").await.unwrap(), "turn-1");

    sessions.disconnect(None).await.unwrap();
    assert!(connector.closed(0));
    assert_eq!(sessions.session_count(), 0);

    assert!(matches!(
        sessions.speak(Some(handle), "<speak/>").await,
        Err(SpeechError::NotConnected)
    ));
    assert!(matches!(
        sessions.speak(None, "<speak/>").await,
        Err(SpeechError::NotConnected)
    ));
}

#[tokio::test]
async fn vendor_cancellation_is_surfaced_and_nothing_is_registered() {
    let mut connector = FakeConnector::new();
    connector.negotiation = SynthesisOutcome::Canceled {
        reason: CancellationReason::Error,
        details: "Avatar service unavailable".to_string(),
    };
    let connector = Arc::new(connector);
    let sessions = registry(&connector);
    sessions.store_ice_token(token());

    match sessions.connect(request()).await {
        Err(SpeechError::Canceled { reason, details }) => {
            assert_eq!(reason, CancellationReason::Error);
            assert_eq!(details, "Avatar service unavailable");
        }
        other => panic!("expected cancellation, got {other:?}"),
    }
    assert_eq!(sessions.session_count(), 0);
    assert!(connector.closed(0));
}

#[tokio::test]
async fn missing_turn_start_fails_connect() {
    let mut connector = FakeConnector::new();
    connector.turn_start = None;
    let connector = Arc::new(connector);
    let sessions = registry(&connector);
    sessions.store_ice_token(token());

    assert!(matches!(
        sessions.connect(request()).await,
        Err(SpeechError::MissingRemoteDescription)
    ));
    assert_eq!(sessions.session_count(), 0);
}

#[tokio::test]
async fn tampered_handle_is_rejected() {
    let connector = Arc::new(FakeConnector::new());
    let sessions = registry(&connector);
    sessions.store_ice_token(token());

    let connected = sessions.connect(request()).await.unwrap();
    let (id, _) = connected.session_id.split_once('.').unwrap();
    let forged = format!("{id}.{}", "00".repeat(32));

    assert!(matches!(
        sessions.speak(Some(&forged), "<speak/>").await,
        Err(SpeechError::InvalidSession)
    ));
    assert!(matches!(
        sessions.speak(Some("no-signature"), "<speak/>").await,
        Err(SpeechError::InvalidSession)
    ));
}

#[tokio::test]
async fn handles_are_not_valid_across_secrets() {
    let connector = Arc::new(FakeConnector::new());
    let sessions = registry(&connector);
    sessions.store_ice_token(token());
    let connected = sessions.connect(request()).await.unwrap();

    let other = AvatarSessions::new(
        Arc::clone(&connector) as Arc<dyn SynthesisConnector>,
        AvatarVideoFormat::default(),
        "another-secret",
    );
    assert!(matches!(
        other.speak(Some(&connected.session_id), "<speak/>").await,
        Err(SpeechError::InvalidSession)
    ));
}

#[tokio::test]
async fn concurrent_sessions_are_independent() {
    let connector = Arc::new(FakeConnector::new());
    let sessions = registry(&connector);
    sessions.store_ice_token(token());

    let first = sessions.connect(request()).await.unwrap();
    // Addressing the session by handle keeps it alive across other connects.
    assert!(sessions.speak(Some(&first.session_id), "<speak/>").await.is_ok());
    let second = sessions.connect(request()).await.unwrap();
    assert_ne!(first.session_id, second.session_id);
    assert_eq!(sessions.session_count(), 2);

    sessions.disconnect(Some(&first.session_id)).await.unwrap();
    assert!(connector.closed(0));
    assert!(!connector.closed(1));

    assert!(sessions.speak(Some(&second.session_id), "<speak/>").await.is_ok());
    // The latest session is still the second one.
    assert!(sessions.speak(None, "<speak/>").await.is_ok());
    assert!(matches!(
        sessions.speak(Some(&first.session_id), "<speak/>").await,
        Err(SpeechError::NotConnected)
    ));
}

#[tokio::test]
async fn reconnecting_without_disconnect_replaces_the_previous_session() {
    let connector = Arc::new(FakeConnector::new());
    let sessions = registry(&connector);
    sessions.store_ice_token(token());

    for _ in 0..50 {
        sessions.connect(request()).await.unwrap();
    }

    assert_eq!(connector.opened(), 50);
    assert_eq!(sessions.session_count(), 1);
    for index in 0..49 {
        assert!(connector.closed(index), "connection {index} left open");
    }
    assert!(!connector.closed(49));

    sessions.disconnect(None).await.unwrap();
    assert!(connector.closed(49));
    assert_eq!(sessions.session_count(), 0);
    assert!(matches!(
        sessions.disconnect(None).await,
        Err(SpeechError::NotConnected)
    ));
}

#[tokio::test]
async fn failed_reconnect_keeps_the_previous_session() {
    let connector = Arc::new(FakeConnector::new());
    let sessions = registry(&connector);
    sessions.store_ice_token(token());
    sessions.connect(request()).await.unwrap();

    connector.refuse.store(true, Ordering::SeqCst);
    assert!(matches!(
        sessions.connect(request()).await,
        Err(SpeechError::Transport(_))
    ));

    assert!(!connector.closed(0));
    assert_eq!(sessions.session_count(), 1);
    assert!(sessions.speak(None, "<speak/>").await.is_ok());
}

#[tokio::test]
async fn disconnecting_latest_falls_back_to_another_live_session() {
    let connector = Arc::new(FakeConnector::new());
    let sessions = registry(&connector);
    sessions.store_ice_token(token());

    let first = sessions.connect(request()).await.unwrap();
    sessions.speak(Some(&first.session_id), "<speak/>").await.unwrap();
    let second = sessions.connect(request()).await.unwrap();
    sessions.speak(Some(&second.session_id), "<speak/>").await.unwrap();

    sessions.disconnect(None).await.unwrap();
    assert!(connector.closed(1));
    assert!(!connector.closed(0));

    // The handle-less slot now reaches the first session.
    assert!(sessions.speak(None, "<speak/>").await.is_ok());
    sessions.disconnect(None).await.unwrap();
    assert!(connector.closed(0));
    assert_eq!(sessions.session_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn session_cap_evicts_least_recently_used() {
    let connector = Arc::new(FakeConnector::new());
    let sessions = registry(&connector).with_limits(SessionLimits {
        max_sessions: 2,
        ..SessionLimits::default()
    });
    sessions.store_ice_token(token());

    let first = sessions.connect(request()).await.unwrap();
    sessions.speak(Some(&first.session_id), "<speak/>").await.unwrap();
    tokio::time::advance(Duration::from_secs(1)).await;
    let second = sessions.connect(request()).await.unwrap();
    sessions.speak(Some(&second.session_id), "<speak/>").await.unwrap();
    tokio::time::advance(Duration::from_secs(1)).await;
    // Touch the first so the second becomes the least recently used.
    sessions.speak(Some(&first.session_id), "<speak/>").await.unwrap();
    tokio::time::advance(Duration::from_secs(1)).await;

    sessions.connect(request()).await.unwrap();
    assert_eq!(sessions.session_count(), 2);
    assert!(!connector.closed(0));
    assert!(connector.closed(1));
    assert!(matches!(
        sessions.speak(Some(&second.session_id), "<speak/>").await,
        Err(SpeechError::NotConnected)
    ));
}

#[tokio::test(start_paused = true)]
async fn idle_and_closed_sessions_are_swept_on_connect() {
    let connector = Arc::new(FakeConnector::new());
    let sessions = registry(&connector).with_limits(SessionLimits {
        idle_timeout_secs: 60,
        ..SessionLimits::default()
    });
    sessions.store_ice_token(token());

    let idle = sessions.connect(request()).await.unwrap();
    sessions.speak(Some(&idle.session_id), "<speak/>").await.unwrap();
    tokio::time::advance(Duration::from_secs(30)).await;
    let dropped = sessions.connect(request()).await.unwrap();
    sessions.speak(Some(&dropped.session_id), "<speak/>").await.unwrap();
    assert_eq!(sessions.session_count(), 2);

    // The vendor hangs up on the second session; the first goes idle.
    connector.closed_flags.lock().unwrap()[1].store(true, Ordering::SeqCst);
    tokio::time::advance(Duration::from_secs(31)).await;

    sessions.connect(request()).await.unwrap();
    assert_eq!(sessions.session_count(), 1);
    assert!(connector.closed(0));
    assert!(matches!(
        sessions.speak(Some(&idle.session_id), "<speak/>").await,
        Err(SpeechError::NotConnected)
    ));
}

use avatar_relay_speech::protocol::{
    encode_text, parse_text, SpeechMessage, CONTENT_TYPE_JSON, PATH_SPEECH_CONFIG, PATH_SSML,
    PATH_SYNTHESIS_CONTEXT, PATH_TURN_END, PATH_TURN_START,
};
use avatar_relay_speech::{
    AvatarSessionConfig, AvatarSessions, AvatarVideoFormat, CancellationReason, ConnectRequest,
    IceToken, SpeechConfig, SpeechError, SynthesisConnector, SynthesisOutcome, TalkingAvatar,
    WebSocketConnector,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

const ANSWER: &str = r#"{"webrtc":{"connectionString":"answer-1"}}"#;
const STALE_ANSWER: &str = r#"{"webrtc":{"connectionString":"stale"}}"#;

/// How the fake speech service answers an `ssml` message.
#[derive(Debug, Clone, Copy)]
enum Vendor {
    /// Noise for another request, then turn.start, audio and turn.end.
    Answer,
    /// Closes the socket with an error code mid-turn.
    CloseMidTurn,
    /// Never answers.
    Silent,
}

#[derive(Debug)]
enum Event {
    Handshake { uri: String, key: Option<String> },
    Message(SpeechMessage),
    Closed,
}

fn audio_frame(request_id: &str) -> Vec<u8> {
    let headers = format!("Path: audio\r\nX-RequestId: {request_id}\r\n");
    let mut frame = (headers.len() as u16).to_be_bytes().to_vec();
    frame.extend_from_slice(headers.as_bytes());
    frame.extend_from_slice(&[0u8; 64]);
    frame
}

fn text(path: &str, request_id: &str, body: &str) -> Message {
    Message::Text(encode_text(path, request_id, CONTENT_TYPE_JSON, body).into())
}

async fn serve(socket: TcpStream, mode: Vendor, events: mpsc::UnboundedSender<Event>) {
    let handshake = events.clone();
    let callback = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        let key = req
            .headers()
            .get("Ocp-Apim-Subscription-Key")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let _ = handshake.send(Event::Handshake {
            uri: req.uri().to_string(),
            key,
        });
        Ok(resp)
    };
    let mut ws = tokio_tungstenite::accept_hdr_async(socket, callback)
        .await
        .unwrap();

    while let Some(Ok(frame)) = ws.next().await {
        match frame {
            Message::Text(body) => {
                let message = parse_text(body.as_str()).unwrap();
                let is_ssml = message.path() == Some(PATH_SSML);
                let request_id = message.request_id().unwrap_or_default().to_string();
                let _ = events.send(Event::Message(message));
                if !is_ssml {
                    continue;
                }
                match mode {
                    Vendor::Answer => {
                        ws.send(text(PATH_TURN_START, "another-request", STALE_ANSWER))
                            .await
                            .unwrap();
                        ws.send(text(PATH_TURN_END, "another-request", "{}"))
                            .await
                            .unwrap();
                        ws.send(text(PATH_TURN_START, &request_id, ANSWER))
                            .await
                            .unwrap();
                        ws.send(Message::Binary(audio_frame(&request_id).into()))
                            .await
                            .unwrap();
                        ws.send(text(PATH_TURN_END, &request_id, "{}"))
                            .await
                            .unwrap();
                    }
                    Vendor::CloseMidTurn => {
                        ws.send(text(PATH_TURN_START, &request_id, ANSWER))
                            .await
                            .unwrap();
                        ws.send(Message::Close(Some(CloseFrame {
                            code: CloseCode::Error,
                            reason: "Avatar service unavailable".into(),
                        })))
                        .await
                        .unwrap();
                    }
                    Vendor::Silent => {}
                }
            }
            Message::Close(_) => {
                let _ = events.send(Event::Closed);
                break;
            }
            _ => {}
        }
    }
}

async fn start_vendor(mode: Vendor) -> (SpeechConfig, mpsc::UnboundedReceiver<Event>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            tokio::spawn(serve(socket, mode, tx.clone()));
        }
    });
    let config = SpeechConfig::new("westus2", "speech-key").with_tts_base_url(format!("http://{addr}"));
    (config, rx)
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<Event>) -> Event {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("vendor event in time")
        .expect("vendor still running")
}

async fn next_message(rx: &mut mpsc::UnboundedReceiver<Event>) -> SpeechMessage {
    match next_event(rx).await {
        Event::Message(message) => message,
        other => panic!("expected a message, got {other:?}"),
    }
}

fn token() -> IceToken {
    IceToken {
        urls: vec!["turn:relay.example.com:3478".to_string()],
        username: "relay-user".to_string(),
        password: "relay-pass".to_string(),
    }
}

fn avatar_config() -> AvatarSessionConfig {
    AvatarSessionConfig::new(
        "local-offer",
        &token(),
        TalkingAvatar {
            character: Some("lisa".to_string()),
            ..Default::default()
        },
        AvatarVideoFormat::default(),
    )
}

#[tokio::test]
async fn speech_config_precedes_turn_messages() {
    let (config, mut events) = start_vendor(Vendor::Answer).await;
    let connector = WebSocketConnector::new(config);

    let connection = connector.open(&avatar_config()).await.unwrap();
    let result = connection.speak_text("Hello & welcome").await.unwrap();
    assert_eq!(result.outcome, SynthesisOutcome::Completed);

    match next_event(&mut events).await {
        Event::Handshake { uri, key } => {
            assert_eq!(uri, "/cognitiveservices/websocket/v1?enableTalkingAvatar=true");
            assert_eq!(key.as_deref(), Some("speech-key"));
        }
        other => panic!("expected the handshake, got {other:?}"),
    }

    let speech_config = next_message(&mut events).await;
    assert_eq!(speech_config.path(), Some(PATH_SPEECH_CONFIG));
    let body: Value = serde_json::from_str(&speech_config.body_text()).unwrap();
    let context = &body["context"];
    assert_eq!(
        context["synthesis"]["video"]["talkingAvatar"]["character"],
        "lisa"
    );
    assert_eq!(
        context["synthesis"]["video"]["protocol"]["webrtcConfig"]["clientDescription"],
        "local-offer"
    );
    assert!(context["system"].is_object());

    let synthesis_context = next_message(&mut events).await;
    assert_eq!(synthesis_context.path(), Some(PATH_SYNTHESIS_CONTEXT));
    let ssml = next_message(&mut events).await;
    assert_eq!(ssml.path(), Some(PATH_SSML));
    assert_eq!(ssml.request_id(), synthesis_context.request_id());
    assert_eq!(ssml.request_id(), Some(result.result_id.as_str()));
    assert!(ssml.body_text().contains("Hello &amp; welcome"));

    // Only the turn.start of our own request is recorded.
    assert_eq!(connection.turn_start_message().as_deref(), Some(ANSWER));
}

#[tokio::test]
async fn avatar_session_negotiates_over_websocket() {
    let (config, mut events) = start_vendor(Vendor::Answer).await;
    let sessions = AvatarSessions::new(
        Arc::new(WebSocketConnector::new(config)) as Arc<dyn SynthesisConnector>,
        AvatarVideoFormat::default(),
        "test-secret",
    );
    sessions.store_ice_token(token());

    let connected = sessions
        .connect(ConnectRequest {
            local_sdp: "local-offer".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(connected.remote_sdp, "answer-1");

    let result_id = sessions.speak(None, "<speak/>").await.unwrap();
    assert_eq!(result_id.len(), 32);

    sessions.disconnect(None).await.unwrap();
    loop {
        if let Event::Closed = next_event(&mut events).await {
            break;
        }
    }
}

#[tokio::test]
async fn vendor_close_mid_turn_cancels_the_turn() {
    let (config, _events) = start_vendor(Vendor::CloseMidTurn).await;
    let connection = WebSocketConnector::new(config)
        .open(&avatar_config())
        .await
        .unwrap();

    let result = connection.speak_ssml("<speak/>").await.unwrap();
    assert_eq!(
        result.outcome,
        SynthesisOutcome::Canceled {
            reason: CancellationReason::Error,
            details: "1011 Avatar service unavailable".to_string(),
        }
    );
    assert!(connection.is_closed());
    assert!(matches!(
        result.into_result_id(),
        Err(SpeechError::Canceled { .. })
    ));
    assert!(matches!(
        connection.speak_ssml("<speak/>").await,
        Err(SpeechError::NotConnected)
    ));
}

#[tokio::test]
async fn silent_vendor_times_out() {
    let (mut config, _events) = start_vendor(Vendor::Silent).await;
    config.turn_timeout_secs = 1;
    let connection = WebSocketConnector::new(config)
        .open(&avatar_config())
        .await
        .unwrap();

    assert!(matches!(
        connection.speak_ssml("<speak/>").await,
        Err(SpeechError::Timeout(1))
    ));
}

#[tokio::test]
async fn close_sends_a_close_frame_once() {
    let (config, mut events) = start_vendor(Vendor::Silent).await;
    let connection = WebSocketConnector::new(config)
        .open(&avatar_config())
        .await
        .unwrap();

    connection.close().await.unwrap();
    assert!(connection.is_closed());
    loop {
        if let Event::Closed = next_event(&mut events).await {
            break;
        }
    }

    connection.close().await.unwrap();
    assert!(matches!(
        connection.speak_ssml("<speak/>").await,
        Err(SpeechError::NotConnected)
    ));
}

//! [`VisionGroundingClient`] – OpenAI-compatible vision grounding.
//!
//! Sends the captured frame as a base64 `image_url` part together with the
//! goal to a `/v1/chat/completions` endpoint.  Planning replies are parsed
//! by [`parse_action`], verification replies by [`parse_verdict`].
//!
//! # Example
//!
//! ```rust,no_run
//! use handeye_perception::VisionGroundingClient;
//!
//! let client = VisionGroundingClient::new("https://open.bigmodel.cn/api/paas/v4", "autoglm-phone")
//!     .with_api_key("sk-...");
//! // client.plan(&frame, "tap the like button").await
//! # drop(client);
//! ```

use std::sync::LazyLock;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use handeye_types::{Action, Frame, GroundingError};
use regex::Regex;
use schemars::schema_for;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::grounding::GroundingClient;

// ─────────────────────────────────────────────────────────────────────────────
// Prompts
// ─────────────────────────────────────────────────────────────────────────────

const PLAN_PROMPT: &str = "\
You operate a phone screen through a robotic finger.
Look at the screenshot and output exactly ONE next action towards the goal.
Coordinates are normalized: (0.0, 0.0) is the top-left corner, (1.0, 1.0) the bottom-right.
Answer either with a single JSON object matching the schema below, or with one call:
Tap(x, y) | Swipe(x1, y1, x2, y2) | Type('text') | Wait(seconds)";

const VERIFY_PROMPT: &str = "\
You verify the effect of the previous action on a phone screen.
Answer YES if the goal is visibly achieved in the screenshot, otherwise NO,
followed by one short sentence of reasoning.";

// ─────────────────────────────────────────────────────────────────────────────
// Wire shapes
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<RequestMessage>,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Serialize)]
struct RequestMessage {
    role: &'static str,
    content: MessageContent,
}

#[derive(Serialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// VisionGroundingClient
// ─────────────────────────────────────────────────────────────────────────────

/// Grounding client backed by an OpenAI-compatible vision model.
pub struct VisionGroundingClient {
    base_url: String,
    model: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl VisionGroundingClient {
    /// Create a client for `base_url` (without the `/v1/...` suffix) and `model`.
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: None,
            client: reqwest::Client::new(),
        }
    }

    /// Send `Authorization: Bearer <key>` with every request.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        self.api_key = (!key.is_empty()).then_some(key);
        self
    }

    /// Replace the HTTP client, e.g. to configure request timeouts.
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    async fn complete(
        &self,
        system: String,
        frame: &Frame,
        instruction: String,
        temperature: f32,
    ) -> Result<String, GroundingError> {
        let image = format!("data:image/png;base64,{}", BASE64.encode(&frame.data));
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                RequestMessage {
                    role: "system",
                    content: MessageContent::Text(system),
                },
                RequestMessage {
                    role: "user",
                    content: MessageContent::Parts(vec![
                        ContentPart::ImageUrl {
                            image_url: ImageUrl { url: image },
                        },
                        ContentPart::Text { text: instruction },
                    ]),
                },
            ],
            temperature,
            max_tokens: 500,
            stream: false,
        };

        let url = format!("{}/v1/chat/completions", self.base_url);
        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response: ChatResponse = request
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| GroundingError::Request(e.to_string()))?
            .json()
            .await
            .map_err(|e| GroundingError::BadResponse(e.to_string()))?;

        response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| GroundingError::BadResponse("empty choices array".into()))
    }
}

#[async_trait]
impl GroundingClient for VisionGroundingClient {
    async fn plan(&mut self, frame: &Frame, goal: &str) -> Result<Action, GroundingError> {
        let schema = serde_json::to_string(&schema_for!(Action)).unwrap_or_default();
        let reply = self
            .complete(
                format!("{PLAN_PROMPT}\n\n{schema}"),
                frame,
                format!("Goal: {goal}\nWhat is the next action?"),
                0.3,
            )
            .await?;
        debug!(%goal, reply = %reply, "plan reply");
        parse_action(&reply)
    }

    async fn verify(&mut self, frame: &Frame, goal: &str) -> Result<bool, GroundingError> {
        let reply = self
            .complete(
                VERIFY_PROMPT.to_string(),
                frame,
                format!("Goal of the previous action: '{goal}'. Is it achieved?"),
                0.1,
            )
            .await?;
        let verdict = parse_verdict(&reply);
        debug!(%goal, verdict, reply = %reply, "verify reply");
        Ok(verdict)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Reply parsing
// ─────────────────────────────────────────────────────────────────────────────

const NUM: &str = r"(-?\d+(?:\.\d+)?)";

static TAP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)\btap\s*\(\s*{NUM}\s*,\s*{NUM}\s*\)")).expect("valid regex")
});
static SWIPE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)\bswipe\s*\(\s*{NUM}\s*,\s*{NUM}\s*,\s*{NUM}\s*,\s*{NUM}\s*\)"
    ))
    .expect("valid regex")
});
static TYPE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\btype\s*\(\s*['"](.*?)['"]\s*\)"#).expect("valid regex")
});
static WAIT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)\bwait\s*\(\s*{NUM}\s*\)")).expect("valid regex")
});

/// Parse a model reply into an [`Action`].
///
/// A JSON object matching the `Action` schema wins; otherwise the first
/// call-style action (`Tap`, `Swipe`, `Type`, `Wait`) in the text is used.
/// Out-of-range coordinates are returned as-is so that the safety guard, not
/// the parser, is the one to reject them.  A negative `Wait` has no such
/// bound to fall back on and is reported as unparseable.
pub fn parse_action(reply: &str) -> Result<Action, GroundingError> {
    if let (Some(start), Some(end)) = (reply.find('{'), reply.rfind('}'))
        && start < end
        && let Ok(action) = serde_json::from_str::<Action>(&reply[start..=end])
    {
        return Ok(action);
    }

    let num = |caps: &regex::Captures<'_>, i: usize| -> f64 {
        caps.get(i)
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(f64::NAN)
    };

    if let Some(c) = SWIPE_RE.captures(reply) {
        return Ok(Action::swipe(num(&c, 1), num(&c, 2), num(&c, 3), num(&c, 4)));
    }
    if let Some(c) = TAP_RE.captures(reply) {
        return Ok(Action::tap(num(&c, 1), num(&c, 2)));
    }
    if let Some(c) = TYPE_RE.captures(reply) {
        return Ok(Action::type_text(&c[1]));
    }
    if let Some(c) = WAIT_RE.captures(reply) {
        let seconds = num(&c, 1);
        if !seconds.is_finite() || seconds < 0.0 {
            warn!(seconds, "negative wait in grounding reply");
            return Err(GroundingError::Unparseable(truncate(reply, 100)));
        }
        return Ok(Action::Wait {
            duration_ms: (seconds * 1000.0).round() as u64,
        });
    }

    warn!(reply = %truncate(reply, 100), "no action found in grounding reply");
    Err(GroundingError::Unparseable(truncate(reply, 100)))
}

/// `true` iff the first word of the reply is `YES` (case-insensitive).
pub fn parse_verdict(reply: &str) -> bool {
    reply
        .split(|c: char| !c.is_alphanumeric())
        .find(|w| !w.is_empty())
        .is_some_and(|w| w.eq_ignore_ascii_case("yes"))
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn reply(content: &str) -> serde_json::Value {
        serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": content } }]
        })
    }

    fn frame() -> Frame {
        Frame::new(1, 1, vec![1, 2, 3])
    }

    #[test]
    fn parses_call_style_actions() {
        assert_eq!(parse_action("Tap(0.5, 0.3)").unwrap(), Action::tap(0.5, 0.3));
        assert_eq!(
            parse_action("I will swipe(0.5,0.8,0.5,0.2) to scroll").unwrap(),
            Action::swipe(0.5, 0.8, 0.5, 0.2)
        );
        assert_eq!(
            parse_action("Type('Hello World')").unwrap(),
            Action::type_text("Hello World")
        );
        assert_eq!(
            parse_action("wait(1.5)").unwrap(),
            Action::Wait { duration_ms: 1500 }
        );
    }

    #[test]
    fn out_of_range_coordinates_survive_parsing() {
        assert_eq!(parse_action("Tap(1.5, -0.2)").unwrap(), Action::tap(1.5, -0.2));
    }

    #[test]
    fn json_reply_takes_precedence() {
        let raw = r#"Sure: {"action":"Tap","payload":{"point":{"x":0.2,"y":0.9}}} (not Tap(0.1, 0.1))"#;
        assert_eq!(parse_action(raw).unwrap(), Action::tap(0.2, 0.9));
    }

    #[test]
    fn unparseable_reply_is_an_error() {
        assert!(matches!(
            parse_action("I am not sure what to do"),
            Err(GroundingError::Unparseable(_))
        ));
    }

    #[test]
    fn negative_wait_is_unparseable() {
        for raw in ["Wait(-3)", "wait(-0.5) then tap"] {
            assert!(
                matches!(parse_action(raw), Err(GroundingError::Unparseable(_))),
                "{raw} should not parse"
            );
        }
        assert_eq!(parse_action("Wait(0)").unwrap(), Action::Wait { duration_ms: 0 });
    }

    #[test]
    fn verdict_reads_first_word() {
        assert!(parse_verdict("YES, the like button is highlighted."));
        assert!(parse_verdict("  yes"));
        assert!(!parse_verdict("NO. Nothing changed, although yes was expected."));
        assert!(!parse_verdict(""));
    }

    #[tokio::test]
    async fn plan_posts_image_and_parses_reply() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(reply("Tap(0.25, 0.75)")))
            .expect(1)
            .mount(&server)
            .await;

        let mut client = VisionGroundingClient::new(server.uri(), "vision").with_api_key("test-key");
        let action = client.plan(&frame(), "tap the like button").await.unwrap();
        assert_eq!(action, Action::tap(0.25, 0.75));

        let requests = server.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body["model"], "vision");
        let url = body["messages"][1]["content"][0]["image_url"]["url"]
            .as_str()
            .unwrap();
        assert!(url.starts_with("data:image/png;base64,"));
        assert_eq!(body["messages"][1]["content"][1]["type"], "text");
    }

    #[tokio::test]
    async fn verify_maps_reply_to_bool() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(reply("NO - still loading")))
            .mount(&server)
            .await;

        let mut client = VisionGroundingClient::new(server.uri(), "vision");
        assert!(!client.verify(&frame(), "open app").await.unwrap());
    }

    #[tokio::test]
    async fn http_error_status_is_a_request_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let mut client = VisionGroundingClient::new(server.uri(), "vision");
        let err = client.plan(&frame(), "open app").await.unwrap_err();
        assert!(matches!(err, GroundingError::Request(_)));
    }

    #[tokio::test]
    async fn empty_choices_is_a_bad_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "choices": [] })),
            )
            .mount(&server)
            .await;

        let mut client = VisionGroundingClient::new(server.uri(), "vision");
        let err = client.verify(&frame(), "open app").await.unwrap_err();
        assert!(matches!(err, GroundingError::BadResponse(_)));
    }

    #[tokio::test]
    async fn unreachable_server_is_a_request_error() {
        // Port 9 (discard) is not expected to serve HTTP.
        let mut client = VisionGroundingClient::new("http://127.0.0.1:9", "vision");
        let err = client.plan(&frame(), "open app").await.unwrap_err();
        assert!(matches!(err, GroundingError::Request(_)));
    }
}

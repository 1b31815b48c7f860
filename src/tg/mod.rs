mod bot;
mod config;
mod error;
mod transport;
pub mod types;

pub use self::bot::*;
pub use self::config::*;
pub use self::error::*;
pub use self::transport::*;
pub use self::types::*;

use std::string::String;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

/// A client for the Telegram Bot API.
pub struct Client<S> {
    config: BotConfig,
    send: S,
}

impl Client<ReqwestTransport> {
    /// Creates a `Client` backed by `reqwest`, after validating `config`.
    pub fn from_config(config: BotConfig) -> Result<Client<ReqwestTransport>> {
        config.validate()?;
        let send = ReqwestTransport::new(config.http_timeout)?;
        Ok(Client::new(config, send))
    }
}

impl<S> Client<S>
where
    S: Transport,
{
    /// Creates a new `Client`. `config` carries the bot token given by
    /// the Botfather. `send` is the transport that puts requests on the
    /// wire and yields the response status and body.
    pub fn new(config: BotConfig, send: S) -> Client<S> {
        Client { config, send }
    }

    pub fn config(&self) -> &BotConfig {
        &self.config
    }

    /// Formats the endpoint URL for the API `method` (e.g. "getUpdates"
    /// or "sendMessage").
    fn method_url(&self, method: &str) -> String {
        let mut url_str = String::from(self.config.api_url.as_str());
        url_str.push_str("bot");
        url_str.push_str(self.config.token());
        url_str.push('/');
        url_str.push_str(method);
        url_str
    }

    /// Fires off an API request and decodes the response envelope. Any
    /// status other than 200 is reported as [`Error::Remote`].
    async fn request<P, T>(
        &self,
        http_method: Method,
        method: &str,
        params: Option<&P>,
    ) -> Result<Response<T>>
    where
        P: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let params = match params {
            Some(p) => Some(serde_json::to_value(p).map_err(|e| Error::Decode(e.to_string()))?),
            None => None,
        };
        let request = HttpRequest {
            method: http_method,
            url: self.method_url(method),
            params,
        };

        debug!(method, "bot api request");
        let response = self.send.send(request).await?;

        if response.status != 200 {
            debug!(method, status = response.status, "bot api request rejected");
            return Err(Error::Remote {
                status: response.status,
                body: response.body,
            });
        }

        serde_json::from_str(&response.body)
            .map_err(|e| Error::Decode(format!("{} response: {}", method, e)))
    }

    /// Like `request`, but unwraps the envelope's `result`.
    async fn call<P, T>(&self, http_method: Method, method: &str, params: Option<&P>) -> Result<T>
    where
        P: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response: Response<T> = self.request(http_method, method, params).await?;
        if !response.ok {
            return Err(Error::Remote {
                status: 200,
                body: response.description.unwrap_or_default(),
            });
        }
        response
            .result
            .ok_or_else(|| Error::Decode(format!("{} response has no result", method)))
    }

    /// Returns basic information about the bot itself.
    pub async fn get_me(&self) -> Result<User> {
        self.call::<(), _>(Method::Get, "getMe", None).await
    }

    /// Sends a plain text message to `chat_id` and returns the message as
    /// stored by the server.
    pub async fn send_message(&self, text: &str, chat_id: i64) -> Result<Message> {
        let params = SendMessage {
            chat_id,
            text: String::from(text),
        };
        self.call(Method::Post, "sendMessage", Some(&params)).await
    }

    /// Long-polls for updates with id `offset` and above. The server holds
    /// the request open for up to `timeout` when nothing is pending.
    pub async fn get_updates(
        &self,
        offset: Option<i64>,
        timeout: Duration,
    ) -> Result<Response<Vec<Update>>> {
        let params = GetUpdates {
            offset,
            timeout: Some(timeout.as_secs()),
        };
        self.request(Method::Get, "getUpdates", Some(&params)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use futures::executor::block_on;
    use futures::future;
    use serde::Deserialize;
    use serde_json::json;

    const TOKEN: &str = "123:abc-xyz";

    fn ok(body: serde_json::Value) -> Result<HttpResponse> {
        Ok(HttpResponse {
            status: 200,
            body: body.to_string(),
        })
    }

    #[test]
    /// Tests that `request` formats its request correctly.
    fn request_format() {
        const METHOD: &str = "fooBar";
        const EXPECTED_URL: &str = "https://api.telegram.org/bot123:abc-xyz/fooBar";

        // Our `send` implementation that will verify what `request`
        // sends.
        let mock_send = |request: HttpRequest| {
            assert_eq!(request.url, EXPECTED_URL);
            assert_eq!(request.method, Method::Get);
            assert_eq!(request.params, None);

            future::ready(ok(json!({"ok": true, "result": null})))
        };

        let client = Client::new(BotConfig::new(TOKEN), mock_send);
        block_on(client.request::<(), ()>(Method::Get, METHOD, None)).unwrap();
    }

    #[test]
    /// Tests that `request` correctly returns the result it receives.
    fn request_result() {
        #[derive(Debug, Deserialize, Eq, PartialEq, Serialize)]
        struct Fromble {
            n: u32,
            b: bool,
        }

        let expected_result = Fromble { n: 1, b: true };
        let body = json!({"ok": true, "result": &expected_result});

        let stub_send = move |_: HttpRequest| future::ready(ok(body.clone()));

        let client = Client::new(BotConfig::new(TOKEN), stub_send);
        let result: Fromble = block_on(client.call::<(), _>(Method::Get, "", None)).unwrap();

        assert_eq!(result, expected_result);
    }

    #[test]
    /// Tests that a custom API URL is honored.
    fn request_uses_configured_api_url() {
        let mock_send = |request: HttpRequest| {
            assert_eq!(request.url, "http://localhost:8081/bot123:abc-xyz/getMe");
            future::ready(ok(json!({
                "ok": true,
                "result": {"id": 1, "is_bot": true, "first_name": "Echo"}
            })))
        };

        let config = BotConfig::new(TOKEN).with_api_url("http://localhost:8081");
        let client = Client::new(config, mock_send);
        block_on(client.get_me()).unwrap();
    }

    #[test]
    fn get_me_returns_identity() {
        let stub_send = |_: HttpRequest| {
            future::ready(ok(json!({
                "ok": true,
                "result": {
                    "id": 123456789,
                    "is_bot": true,
                    "first_name": "Echo",
                    "username": "echo_bot"
                }
            })))
        };

        let client = Client::new(BotConfig::new(TOKEN), stub_send);
        let me = block_on(client.get_me()).unwrap();

        assert_eq!(me.id, 123456789);
        assert!(me.is_bot);
        assert_eq!(me.first_name, "Echo");
        assert_eq!(me.username.as_deref(), Some("echo_bot"));
    }

    #[test]
    fn get_me_unauthorized_is_remote_error() {
        let body = r#"{"ok":false,"error_code":401,"description":"Unauthorized"}"#;
        let stub_send = move |_: HttpRequest| {
            future::ready(Ok(HttpResponse {
                status: 401,
                body: String::from(body),
            }))
        };

        let client = Client::new(BotConfig::new(TOKEN), stub_send);
        match block_on(client.get_me()) {
            Err(Error::Remote { status, body }) => {
                assert_eq!(status, 401);
                assert!(body.contains("Unauthorized"));
            }
            other => panic!("expected remote error, got {:?}", other),
        }
    }

    #[test]
    fn get_me_transport_failure_is_surfaced() {
        let stub_send =
            |_: HttpRequest| future::ready(Err::<HttpResponse, _>(Error::Transport(
                "connection refused".into(),
            )));

        let client = Client::new(BotConfig::new(TOKEN), stub_send);
        assert!(matches!(
            block_on(client.get_me()),
            Err(Error::Transport(_))
        ));
    }

    #[test]
    fn malformed_body_is_decode_error() {
        let stub_send = |_: HttpRequest| {
            future::ready(Ok(HttpResponse {
                status: 200,
                body: String::from("<html>not json</html>"),
            }))
        };

        let client = Client::new(BotConfig::new(TOKEN), stub_send);
        assert!(matches!(block_on(client.get_me()), Err(Error::Decode(_))));
    }

    #[test]
    fn send_message_posts_chat_id_and_text() {
        let mock_send = |request: HttpRequest| {
            assert_eq!(request.method, Method::Post);
            assert!(request.url.ends_with("/sendMessage"));
            assert_eq!(request.params, Some(json!({"chat_id": 42, "text": "hi"})));

            future::ready(ok(json!({
                "ok": true,
                "result": {
                    "message_id": 7,
                    "chat": {"id": 42, "type": "private"},
                    "date": 1504981128,
                    "text": "hi"
                }
            })))
        };

        let client = Client::new(BotConfig::new(TOKEN), mock_send);
        let sent = block_on(client.send_message("hi", 42)).unwrap();
        assert_eq!(sent.message_id, 7);
        assert_eq!(sent.chat.id, 42);
    }

    #[test]
    /// Tests that a rejected send is reported instead of dropped.
    fn send_message_rejection_is_surfaced() {
        let body = r#"{"ok":false,"error_code":400,"description":"Bad Request: chat not found"}"#;
        let stub_send = move |_: HttpRequest| {
            future::ready(Ok(HttpResponse {
                status: 400,
                body: String::from(body),
            }))
        };

        let client = Client::new(BotConfig::new(TOKEN), stub_send);
        assert!(matches!(
            block_on(client.send_message("hi", 1)),
            Err(Error::Remote { status: 400, .. })
        ));
    }

    #[test]
    fn get_updates_sends_timeout_and_offset() {
        let mock_send = |request: HttpRequest| {
            assert_eq!(request.method, Method::Get);
            assert!(request.url.ends_with("/getUpdates"));
            assert_eq!(request.params, Some(json!({"offset": 5, "timeout": 30})));
            future::ready(ok(json!({"ok": true, "result": []})))
        };

        let client = Client::new(BotConfig::new(TOKEN), mock_send);
        let response = block_on(client.get_updates(Some(5), Duration::from_secs(30))).unwrap();
        assert!(response.ok);
        assert!(response.result.unwrap().is_empty());
    }

    #[test]
    fn get_updates_omits_unset_offset() {
        let mock_send = |request: HttpRequest| {
            assert_eq!(request.params, Some(json!({"timeout": 30})));
            future::ready(ok(json!({"ok": true, "result": []})))
        };

        let client = Client::new(BotConfig::new(TOKEN), mock_send);
        block_on(client.get_updates(None, Duration::from_secs(30))).unwrap();
    }
}

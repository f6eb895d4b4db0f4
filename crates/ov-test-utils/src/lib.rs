// ov-test-utils: Shared test doubles for the broker suite.
//
// Provides scriptable mock upstream endpoints — event-bus WebSocket,
// subscription/token HTTP, IRC-over-WebSocket chat, and a webhook
// receiver — for integration testing the broker end to end.

pub mod mock_chat;
pub mod mock_event_bus;
pub mod mock_upstream_http;
pub mod mock_webhook;

pub use mock_chat::MockChat;
pub use mock_event_bus::MockEventBus;
pub use mock_upstream_http::MockUpstreamHttp;
pub use mock_webhook::MockWebhook;

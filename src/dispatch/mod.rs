pub mod dispatcher;
pub mod policy;
pub mod sink;

pub use dispatcher::{format_content, DispatchError, Dispatcher, MessageSender, WorkerStats};
pub use policy::{ContentPolicy, SuppressedPhrases};
pub use sink::{DeliverySink, LogSink, WebhookSink};

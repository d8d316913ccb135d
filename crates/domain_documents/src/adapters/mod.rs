//! Adapters for the remote collaborators of the worker

pub mod accounting_http;
pub mod mail_relay;

pub use accounting_http::{AccountingHttpConfig, HttpAccountingGateway};
pub use mail_relay::{HttpMailRelay, MailRelayConfig};

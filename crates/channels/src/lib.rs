//! Outbound channels: reference email and SMS providers, plus template-based
//! content generation.

pub mod content;
pub mod email;
pub mod sms;

pub use content::TemplateContentGenerator;
pub use email::{EmailProvider, EmailWebhookEvent};
pub use sms::{SmsProvider, SmsStatusCallback};

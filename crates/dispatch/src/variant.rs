//! Per-recipient message preparation: variant choice, placeholder rendering,
//! and destination lookup.

use campaign_core::types::{Channel, Customer, MessageVariant};

/// First variant sharing a tag with the customer, otherwise the first
/// variant. `None` only when there are no variants.
pub fn select_variant<'a>(
    variants: &'a [MessageVariant],
    customer: &Customer,
) -> Option<(usize, &'a MessageVariant)> {
    variants
        .iter()
        .enumerate()
        .find(|(_, v)| v.tags.iter().any(|t| customer.has_tag(t)))
        .or_else(|| variants.first().map(|v| (0, v)))
}

/// Fills `{{name}}`, `{{firstName}}`, `{{email}}`, and `{{city}}`. Unknown
/// placeholders are left as written.
pub fn render(template: &str, customer: &Customer) -> String {
    let first_name = customer.name.split_whitespace().next().unwrap_or_default();
    template
        .replace("{{name}}", &customer.name)
        .replace("{{firstName}}", first_name)
        .replace("{{email}}", customer.email.as_deref().unwrap_or_default())
        .replace("{{city}}", customer.address.city.as_deref().unwrap_or_default())
}

/// Email address for email campaigns, phone number for SMS. Blank values
/// count as missing.
pub fn destination(channel: Channel, customer: &Customer) -> Option<&str> {
    let value = match channel {
        Channel::Email => customer.email.as_deref(),
        Channel::Sms => customer.phone.as_deref(),
    };
    value.map(str::trim).filter(|v| !v.is_empty())
}

//! Rule engine. Evaluates one audience rule against one customer.
//!
//! Field typing decides how the dual-purpose operators behave:
//! - `tags` is the only collection field. `contains`/`notContains` test
//!   membership; `equals` compares as a set when the rule value is an array
//!   and as membership when it is a single string.
//! - `city` and `country` are strings. `contains`/`notContains` are
//!   case-sensitive substring tests.
//! - `totalSpent` is numeric and `lastOrderDate` chronological. Only these
//!   two support `greaterThan`, `lessThan`, and `between`.
//!
//! A missing field never equals a non-null value. Anything that cannot be
//! compared fails closed.

use std::cmp::Ordering;
use std::collections::HashSet;

use campaign_core::types::{Customer, Rule, RuleCombinator, RuleField, RuleOperator};
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;

enum FieldValue<'a> {
    Number(f64),
    Instant(DateTime<Utc>),
    Text(&'a str),
    Tags(&'a [String]),
    Missing,
}

fn field_value(field: RuleField, customer: &Customer) -> FieldValue<'_> {
    match field {
        RuleField::TotalSpent => FieldValue::Number(customer.total_spent),
        RuleField::LastOrderDate => customer
            .last_order_date
            .map_or(FieldValue::Missing, FieldValue::Instant),
        RuleField::Tags => FieldValue::Tags(&customer.tags),
        RuleField::City => customer
            .address
            .city
            .as_deref()
            .map_or(FieldValue::Missing, FieldValue::Text),
        RuleField::Country => customer
            .address
            .country
            .as_deref()
            .map_or(FieldValue::Missing, FieldValue::Text),
        RuleField::Unknown => FieldValue::Missing,
    }
}

/// Whether `customer` satisfies `rule`. Never fails: mismatches, malformed
/// values, and unknown operators all evaluate to `false`.
pub fn matches(rule: &Rule, customer: &Customer) -> bool {
    let actual = field_value(rule.field, customer);
    match rule.operator {
        RuleOperator::Equals => equals(&actual, &rule.value),
        RuleOperator::NotEquals => !equals(&actual, &rule.value),
        RuleOperator::Contains => contains(&actual, &rule.value),
        RuleOperator::NotContains => !contains(&actual, &rule.value),
        RuleOperator::GreaterThan => compare(&actual, &rule.value) == Some(Ordering::Greater),
        RuleOperator::LessThan => compare(&actual, &rule.value) == Some(Ordering::Less),
        RuleOperator::Between => match &rule.value2 {
            Some(high) => {
                let above_low = matches!(
                    compare(&actual, &rule.value),
                    Some(Ordering::Greater | Ordering::Equal)
                );
                let below_high = matches!(
                    compare(&actual, high),
                    Some(Ordering::Less | Ordering::Equal)
                );
                above_low && below_high
            }
            None => false,
        },
        RuleOperator::Unknown => false,
    }
}

/// Combines rules: `AND` over an empty list matches everyone, `OR` over an
/// empty list matches no one.
pub fn segment_matches(rules: &[Rule], combinator: RuleCombinator, customer: &Customer) -> bool {
    match combinator {
        RuleCombinator::And => rules.iter().all(|r| matches(r, customer)),
        RuleCombinator::Or => rules.iter().any(|r| matches(r, customer)),
    }
}

/// Structural check run before a segment is evaluated. Unknown fields and
/// operators pass: they are isolated at evaluation time as non-matches.
pub fn validate_rule(rule: &Rule) -> Result<(), String> {
    if rule.value.is_null() {
        return Err(format!("rule on {} has no value", rule.field.as_str()));
    }
    if rule.operator == RuleOperator::Between
        && rule.value2.as_ref().map_or(true, Value::is_null)
    {
        return Err(format!(
            "between on {} requires value2",
            rule.field.as_str()
        ));
    }
    if rule.field.is_collection() && rule.operator.is_ordering() {
        return Err(format!(
            "{:?} cannot be applied to collection field {}",
            rule.operator,
            rule.field.as_str()
        ));
    }
    Ok(())
}

fn equals(actual: &FieldValue<'_>, expected: &Value) -> bool {
    match actual {
        FieldValue::Missing => expected.is_null(),
        FieldValue::Number(n) => parse_number(expected).map_or(false, |e| *n == e),
        FieldValue::Instant(t) => parse_instant(expected).map_or(false, |e| *t == e),
        FieldValue::Text(s) => expected.as_str() == Some(*s),
        FieldValue::Tags(tags) => match expected {
            Value::Array(items) => {
                let wanted: Option<HashSet<&str>> = items.iter().map(Value::as_str).collect();
                let have: HashSet<&str> = tags.iter().map(String::as_str).collect();
                wanted.map_or(false, |w| w == have)
            }
            Value::String(tag) => tags.iter().any(|t| t == tag),
            _ => false,
        },
    }
}

fn contains(actual: &FieldValue<'_>, expected: &Value) -> bool {
    let Some(needle) = expected.as_str() else {
        return false;
    };
    match actual {
        FieldValue::Tags(tags) => tags.iter().any(|t| t == needle),
        FieldValue::Text(s) => s.contains(needle),
        _ => false,
    }
}

fn compare(actual: &FieldValue<'_>, expected: &Value) -> Option<Ordering> {
    match actual {
        FieldValue::Number(n) => n.partial_cmp(&parse_number(expected)?),
        FieldValue::Instant(t) => Some(t.cmp(&parse_instant(expected)?)),
        _ => None,
    }
}

fn parse_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Accepts RFC 3339 timestamps, plain `YYYY-MM-DD` dates (midnight UTC), and
/// epoch milliseconds.
pub fn parse_instant(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                NaiveDate::parse_from_str(s, "%Y-%m-%d")
                    .ok()
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
                    .map(|naive| naive.and_utc())
            }),
        Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
        _ => None,
    }
}

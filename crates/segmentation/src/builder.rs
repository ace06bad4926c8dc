//! Segment builder. Fluent API for constructing validated segment rules.

use serde_json::Value;

use campaign_core::types::{Rule, RuleCombinator, RuleField, RuleOperator, Segment};
use campaign_core::CampaignResult;

use crate::engine::SegmentEvaluator;

pub struct SegmentBuilder {
    name: String,
    description: Option<String>,
    rules: Vec<Rule>,
    combinator: RuleCombinator,
}

impl SegmentBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            rules: Vec::new(),
            combinator: RuleCombinator::And,
        }
    }

    pub fn description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    pub fn with_or(mut self) -> Self {
        self.combinator = RuleCombinator::Or;
        self
    }

    pub fn rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn spent_over(self, amount: f64) -> Self {
        self.rule(Rule::new(RuleField::TotalSpent, RuleOperator::GreaterThan, amount))
    }

    pub fn spent_under(self, amount: f64) -> Self {
        self.rule(Rule::new(RuleField::TotalSpent, RuleOperator::LessThan, amount))
    }

    pub fn spent_between(self, low: f64, high: f64) -> Self {
        self.rule(Rule::between(RuleField::TotalSpent, low, high))
    }

    pub fn ordered_since(self, date: impl Into<Value>) -> Self {
        self.rule(Rule::new(RuleField::LastOrderDate, RuleOperator::GreaterThan, date))
    }

    pub fn ordered_before(self, date: impl Into<Value>) -> Self {
        self.rule(Rule::new(RuleField::LastOrderDate, RuleOperator::LessThan, date))
    }

    pub fn has_tag(self, tag: impl Into<String>) -> Self {
        self.rule(Rule::new(RuleField::Tags, RuleOperator::Contains, tag.into()))
    }

    pub fn lacks_tag(self, tag: impl Into<String>) -> Self {
        self.rule(Rule::new(RuleField::Tags, RuleOperator::NotContains, tag.into()))
    }

    pub fn in_city(self, city: impl Into<String>) -> Self {
        self.rule(Rule::new(RuleField::City, RuleOperator::Equals, city.into()))
    }

    pub fn in_country(self, country: impl Into<String>) -> Self {
        self.rule(Rule::new(RuleField::Country, RuleOperator::Equals, country.into()))
    }

    pub fn build(self) -> CampaignResult<Segment> {
        let mut segment = Segment::new(self.name, self.rules, self.combinator);
        segment.description = self.description;
        SegmentEvaluator::validate_segment(&segment)?;
        Ok(segment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_and_rules() {
        let segment = SegmentBuilder::new("loyal locals")
            .description("high value customers in Austin")
            .spent_over(500.0)
            .in_city("Austin")
            .lacks_tag("churned")
            .build()
            .unwrap();

        assert_eq!(segment.rules.len(), 3);
        assert_eq!(segment.combinator, RuleCombinator::And);
        assert_eq!(segment.rules_version, 1);
        assert_eq!(
            segment.descriptor(),
            "loyal locals: high value customers in Austin"
        );
    }

    #[test]
    fn or_builder_sets_combinator() {
        let segment = SegmentBuilder::new("either")
            .with_or()
            .has_tag("vip")
            .spent_between(100.0, 200.0)
            .build()
            .unwrap();
        assert_eq!(segment.combinator, RuleCombinator::Or);
        assert_eq!(segment.rules[1].value2, Some(serde_json::json!(200.0)));
    }

    #[test]
    fn invalid_rule_is_rejected_at_build() {
        let err = SegmentBuilder::new("bad")
            .rule(Rule::new(RuleField::Tags, RuleOperator::LessThan, "x"))
            .build()
            .unwrap_err();
        assert_eq!(err.kind(), "validation_error");
    }
}

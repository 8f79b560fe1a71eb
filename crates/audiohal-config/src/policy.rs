//! Rule-based policy engine.
//!
//! Each rule ties a route to a criterion and the literals under which the
//! route may be used. A route is applicable when every one of its rules
//! holds. Rules read the pending criterion values, so a criterion staged
//! with `set_audio_criterion` takes effect in the next routing cycle.

use audiohal_route::{CriterionSet, PolicyEngine, RouteControl, RoutingStage};
use tracing::{debug, trace};

/// One applicability condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    criterion: String,
    values: Vec<String>,
}

impl Rule {
    /// Holds when `criterion` takes one of `values`.
    pub fn new<'a>(criterion: &str, values: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            criterion: criterion.to_string(),
            values: values.into_iter().map(str::to_string).collect(),
        }
    }

    /// Criterion name.
    pub fn criterion(&self) -> &str {
        &self.criterion
    }

    /// Whether the pending value of the criterion matches a literal.
    ///
    /// Exclusive types compare for equality. Inclusive types match when all
    /// bits of the literal are set, and `0` matches only an empty value.
    pub fn matches(&self, criteria: &CriterionSet) -> bool {
        let Some(criterion) = criteria.get(&self.criterion) else {
            return false;
        };
        let Some(ty) = criteria.criterion_type(criterion.type_name()) else {
            return false;
        };
        let pending = criterion.pending();
        self.values
            .iter()
            .filter_map(|literal| ty.literal_to_value(literal))
            .any(|v| {
                if !ty.is_inclusive() {
                    pending == v
                } else if v == 0 {
                    pending == 0
                } else {
                    pending & v == v
                }
            })
    }
}

/// Policy engine driven by per-route [`Rule`]s.
///
/// Routes without rules are not touched.
#[derive(Debug, Clone, Default)]
pub struct RulePolicy {
    routes: Vec<(String, Vec<Rule>)>,
    voice_volume: f32,
}

impl RulePolicy {
    /// Creates a policy with no rules.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a rule to the route with `key`.
    pub fn with_rule(mut self, key: &str, rule: Rule) -> Self {
        match self.routes.iter_mut().find(|(k, _)| k == key) {
            Some((_, rules)) => rules.push(rule),
            None => self.routes.push((key.to_string(), vec![rule])),
        }
        self
    }

    /// Rules of the route with `key`.
    pub fn rules(&self, key: &str) -> &[Rule] {
        self.routes
            .iter()
            .find(|(k, _)| k == key)
            .map_or(&[], |(_, rules)| rules.as_slice())
    }

    /// Last voice volume forwarded by the manager.
    pub fn voice_volume(&self) -> f32 {
        self.voice_volume
    }
}

impl PolicyEngine for RulePolicy {
    fn evaluate(
        &mut self,
        criteria: &CriterionSet,
        control: &mut RouteControl<'_>,
    ) -> audiohal_route::Result<()> {
        for (key, rules) in &self.routes {
            let applicable = rules.iter().all(|rule| rule.matches(criteria));
            trace!("policy: {key} applicable={applicable}");
            control.set_applicable(key, applicable)?;
        }
        Ok(())
    }

    fn apply(&mut self, stage: RoutingStage, _criteria: &CriterionSet) {
        trace!("policy: apply {stage}");
    }

    fn set_voice_volume(&mut self, gain: f32) {
        debug!("policy: voice volume {gain}");
        self.voice_volume = gain;
    }
}

//! Criteria: named integer values exposed to the policy engine.
//!
//! Each criterion has a type that maps literals to values. Inclusive types are
//! bit sets (several literals at once, joined with `|`); exclusive types hold
//! exactly one of their literals. A criterion keeps a pending value, staged by
//! [`Criterion::set_value`], and a committed value that only changes on
//! [`Criterion::commit`] at a routing cycle boundary.

use tracing::{debug, trace};

use crate::error::{Result, RouteError};

/// Literal to value table of a criterion type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CriterionType {
    name: String,
    inclusive: bool,
    pairs: Vec<(i32, String)>,
}

impl CriterionType {
    /// Creates an empty type.
    pub fn new(name: &str, inclusive: bool) -> Self {
        Self {
            name: name.to_string(),
            inclusive,
            pairs: Vec::new(),
        }
    }

    /// Type name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether values are bit sets.
    pub fn is_inclusive(&self) -> bool {
        self.inclusive
    }

    /// `(value, literal)` pairs in declaration order.
    pub fn value_pairs(&self) -> &[(i32, String)] {
        &self.pairs
    }

    /// Adds a pair. Returns `false` and keeps the table unchanged when the
    /// literal is already known.
    pub fn add_value_pair(&mut self, value: i32, literal: &str) -> bool {
        if self.pairs.iter().any(|(_, l)| l == literal) {
            trace!("criterion type {}: literal {literal} already added", self.name);
            return false;
        }
        self.pairs.push((value, literal.to_string()));
        true
    }

    /// Resolves a literal: table lookup first, then `0x` hex or decimal.
    ///
    /// Inclusive types also accept `|`-joined literals. Exclusive types only
    /// accept values present in their table.
    pub fn literal_to_value(&self, literal: &str) -> Option<i32> {
        let literal = literal.trim();
        if self.inclusive {
            if literal == "none" {
                return Some(0);
            }
            if literal.contains('|') {
                return literal
                    .split('|')
                    .try_fold(0i32, |acc, part| Some(acc | self.single_value(part.trim())?));
            }
            return self.single_value(literal);
        }
        let value = self.single_value(literal)?;
        self.pairs.iter().any(|&(v, _)| v == value).then_some(value)
    }

    fn single_value(&self, literal: &str) -> Option<i32> {
        if let Some(&(value, _)) = self.pairs.iter().find(|(_, l)| l == literal) {
            return Some(value);
        }
        parse_numeric(literal)
    }

    /// Formats a value: the `|`-joined literals of its bits ("none" for 0)
    /// for inclusive types, the matching literal or the number otherwise.
    pub fn format_value(&self, value: i32) -> String {
        if !self.inclusive {
            return self
                .pairs
                .iter()
                .find(|&&(v, _)| v == value)
                .map_or_else(|| value.to_string(), |(_, l)| l.clone());
        }
        if value == 0 {
            return "none".to_string();
        }
        let mut parts = Vec::new();
        let mut covered = 0i32;
        for (v, literal) in &self.pairs {
            if *v != 0 && value & v == *v {
                parts.push(literal.clone());
                covered |= v;
            }
        }
        let rest = value & !covered;
        if rest != 0 {
            parts.push(format!("{:#x}", rest as u32));
        }
        parts.join("|")
    }
}

fn parse_numeric(literal: &str) -> Option<i32> {
    if let Some(hex) = literal
        .strip_prefix("0x")
        .or_else(|| literal.strip_prefix("0X"))
    {
        return u32::from_str_radix(hex, 16).ok().map(|v| v as i32);
    }
    literal.parse::<i32>().ok()
}

/// A named value with pending and committed halves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Criterion {
    name: String,
    type_name: String,
    committed: i32,
    pending: i32,
}

impl Criterion {
    /// Creates a criterion with both halves set to `value`.
    pub fn new(name: &str, type_name: &str, value: i32) -> Self {
        Self {
            name: name.to_string(),
            type_name: type_name.to_string(),
            committed: value,
            pending: value,
        }
    }

    /// Criterion name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the criterion type.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Committed value, as seen by the policy engine.
    pub fn value(&self) -> i32 {
        self.committed
    }

    /// Staged value.
    pub fn pending(&self) -> i32 {
        self.pending
    }

    /// Stages `value`. Returns whether the pending value changed.
    pub fn set_value(&mut self, value: i32) -> bool {
        if self.pending == value {
            return false;
        }
        self.pending = value;
        true
    }

    /// Publishes the pending value. Returns whether the committed value changed.
    pub fn commit(&mut self) -> bool {
        if self.committed == self.pending {
            return false;
        }
        trace!(
            "criterion {}: {} -> {}",
            self.name, self.committed, self.pending
        );
        self.committed = self.pending;
        true
    }

    /// Stages and publishes `value` at once.
    pub fn set_state(&mut self, value: i32) -> bool {
        self.set_value(value);
        self.commit()
    }
}

/// Criterion types and criteria, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct CriterionSet {
    types: Vec<CriterionType>,
    criteria: Vec<Criterion>,
}

impl CriterionSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a type. Returns `false` when a type with this name exists.
    pub fn add_type(&mut self, name: &str, inclusive: bool) -> bool {
        if self.criterion_type(name).is_some() {
            return false;
        }
        debug!(
            "criteria: type {name} [{}]",
            if inclusive { "inclusive" } else { "exclusive" }
        );
        self.types.push(CriterionType::new(name, inclusive));
        true
    }

    /// Adds a value pair to a type. A known literal is kept as is.
    pub fn add_value_pair(&mut self, type_name: &str, literal: &str, value: i32) -> Result<()> {
        let ty = self
            .types
            .iter_mut()
            .find(|t| t.name == type_name)
            .ok_or_else(|| RouteError::UnknownCriterionType(type_name.to_string()))?;
        ty.add_value_pair(value, literal);
        Ok(())
    }

    /// Declares a criterion, optionally initialised from a literal.
    pub fn add_criterion(
        &mut self,
        name: &str,
        type_name: &str,
        default_literal: Option<&str>,
    ) -> Result<()> {
        if self.get(name).is_some() {
            return Err(RouteError::duplicate("criterion", name));
        }
        let ty = self
            .criterion_type(type_name)
            .ok_or_else(|| RouteError::UnknownCriterionType(type_name.to_string()))?;
        let value = match default_literal {
            Some(literal) => resolve(ty, literal)?,
            None => 0,
        };
        self.criteria.push(Criterion::new(name, type_name, value));
        debug!("criteria: {name} of type {type_name} = {value}");
        Ok(())
    }

    /// Type by name.
    pub fn criterion_type(&self, name: &str) -> Option<&CriterionType> {
        self.types.iter().find(|t| t.name == name)
    }

    /// Criterion by name.
    pub fn get(&self, name: &str) -> Option<&Criterion> {
        self.criteria.iter().find(|c| c.name == name)
    }

    fn get_mut(&mut self, name: &str) -> Result<&mut Criterion> {
        self.criteria
            .iter_mut()
            .find(|c| c.name == name)
            .ok_or_else(|| RouteError::UnknownCriterion(name.to_string()))
    }

    /// All criteria in declaration order.
    pub fn criteria(&self) -> &[Criterion] {
        &self.criteria
    }

    /// All types in declaration order.
    pub fn types(&self) -> &[CriterionType] {
        &self.types
    }

    /// Stages a numeric value. Returns whether the pending value changed.
    pub fn set_value(&mut self, name: &str, value: i32) -> Result<bool> {
        Ok(self.get_mut(name)?.set_value(value))
    }

    /// Stages a literal value. Returns whether the pending value changed.
    pub fn set_literal(&mut self, name: &str, literal: &str) -> Result<bool> {
        let criterion = self
            .get(name)
            .ok_or_else(|| RouteError::UnknownCriterion(name.to_string()))?;
        let ty = self
            .criterion_type(&criterion.type_name)
            .ok_or_else(|| RouteError::UnknownCriterionType(criterion.type_name.clone()))?;
        let value = resolve(ty, literal)?;
        self.set_value(name, value)
    }

    /// Stages and publishes a value at once.
    pub fn set_state(&mut self, name: &str, value: i32) -> Result<bool> {
        Ok(self.get_mut(name)?.set_state(value))
    }

    /// Publishes every pending value. Returns whether any committed value changed.
    pub fn commit_all(&mut self) -> bool {
        self.criteria
            .iter_mut()
            .fold(false, |changed, c| c.commit() | changed)
    }

    /// Committed value of a criterion.
    pub fn value(&self, name: &str) -> Result<i32> {
        self.get(name)
            .map(Criterion::value)
            .ok_or_else(|| RouteError::UnknownCriterion(name.to_string()))
    }

    /// Committed value of a criterion, formatted with its type's literals.
    pub fn formatted(&self, name: &str) -> Result<String> {
        let criterion = self
            .get(name)
            .ok_or_else(|| RouteError::UnknownCriterion(name.to_string()))?;
        Ok(self
            .criterion_type(&criterion.type_name)
            .map_or_else(|| criterion.value().to_string(), |t| t.format_value(criterion.value())))
    }
}

fn resolve(ty: &CriterionType, literal: &str) -> Result<i32> {
    ty.literal_to_value(literal)
        .ok_or_else(|| RouteError::InvalidLiteral {
            criterion_type: ty.name.clone(),
            literal: literal.to_string(),
        })
}

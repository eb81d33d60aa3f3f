//! The problem definition consumed by the optimizer: objectives, constraints,
//! cancel criteria, replication sufficiency and objective comparison.

use so_types::{problem_error, Configuration, ObjectiveMap, OptResult, Responses};
use std::cmp::Ordering;
use std::fmt;

use crate::criteria::{CancelCriterion, PostConstraint, PreConstraint, ReplicationCriterion};
use crate::pareto::pareto_dominance;
use crate::record::ReplicationRecord;
use crate::statistics::rank_by_sum;

/// Everything the optimizer needs to know about the problem being optimized.
pub trait ProblemDefinition: Send {
    /// Declared objective names, used to build the +infinity failure vector.
    fn objective_names(&self) -> Vec<String>;

    fn pre_constraints(&self) -> &[Box<dyn PreConstraint>] {
        &[]
    }

    fn post_constraints(&self) -> &[Box<dyn PostConstraint>] {
        &[]
    }

    fn cancel_criteria(&self) -> &[Box<dyn CancelCriterion>] {
        &[]
    }

    /// All criteria must be satisfied before a record is finalized. No
    /// criteria means one run is enough.
    fn replication_criteria(&self) -> &[Box<dyn ReplicationCriterion>] {
        &[]
    }

    /// Objective values for one run's observed responses.
    fn calc_objectives(
        &self,
        configuration: &Configuration,
        responses: &Responses,
    ) -> OptResult<ObjectiveMap>;

    /// Reduce a record's runs to one representative vector.
    fn representative(&self, record: &ReplicationRecord) -> OptResult<ObjectiveMap> {
        Ok(record.mean_objectives())
    }

    /// Partial order used by the Pareto front.
    fn dominance(&self, a: &ObjectiveMap, b: &ObjectiveMap) -> Ordering {
        pareto_dominance(a, b)
    }

    /// Total order used by the bounded best list.
    fn rank(&self, a: &ObjectiveMap, b: &ObjectiveMap) -> Ordering {
        rank_by_sum(a, b)
    }
}

type ObjectiveFn = Box<dyn Fn(&Configuration, &Responses) -> OptResult<ObjectiveMap> + Send + Sync>;

/// Problem definition assembled from closures and predicate values.
pub struct SimpleProblem {
    objective_names: Vec<String>,
    objective_fn: ObjectiveFn,
    pre_constraints: Vec<Box<dyn PreConstraint>>,
    post_constraints: Vec<Box<dyn PostConstraint>>,
    cancel_criteria: Vec<Box<dyn CancelCriterion>>,
    replication_criteria: Vec<Box<dyn ReplicationCriterion>>,
}

impl SimpleProblem {
    pub fn new<I, S, F>(objective_names: I, objective_fn: F) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: Fn(&Configuration, &Responses) -> OptResult<ObjectiveMap> + Send + Sync + 'static,
    {
        Self {
            objective_names: objective_names.into_iter().map(Into::into).collect(),
            objective_fn: Box::new(objective_fn),
            pre_constraints: Vec::new(),
            post_constraints: Vec::new(),
            cancel_criteria: Vec::new(),
            replication_criteria: Vec::new(),
        }
    }

    /// Each objective is the response of the same name, minimized as-is.
    pub fn minimize_responses<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        let lookup = names.clone();
        Self::new(names, move |_, responses| {
            lookup
                .iter()
                .map(|name| {
                    responses
                        .get(name)
                        .map(|v| (name.clone(), *v))
                        .ok_or_else(|| problem_error!("response '{name}' missing"))
                })
                .collect()
        })
    }

    pub fn with_pre_constraint(mut self, constraint: impl PreConstraint + 'static) -> Self {
        self.pre_constraints.push(Box::new(constraint));
        self
    }

    pub fn with_post_constraint(mut self, constraint: impl PostConstraint + 'static) -> Self {
        self.post_constraints.push(Box::new(constraint));
        self
    }

    pub fn with_cancel_criterion(mut self, criterion: impl CancelCriterion + 'static) -> Self {
        self.cancel_criteria.push(Box::new(criterion));
        self
    }

    pub fn with_replication_criterion(
        mut self,
        criterion: impl ReplicationCriterion + 'static,
    ) -> Self {
        self.replication_criteria.push(Box::new(criterion));
        self
    }
}

impl fmt::Debug for SimpleProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimpleProblem")
            .field("objective_names", &self.objective_names)
            .field("pre_constraints", &self.pre_constraints.len())
            .field("post_constraints", &self.post_constraints.len())
            .field("cancel_criteria", &self.cancel_criteria.len())
            .field("replication_criteria", &self.replication_criteria.len())
            .finish()
    }
}

impl ProblemDefinition for SimpleProblem {
    fn objective_names(&self) -> Vec<String> {
        self.objective_names.clone()
    }

    fn pre_constraints(&self) -> &[Box<dyn PreConstraint>] {
        &self.pre_constraints
    }

    fn post_constraints(&self) -> &[Box<dyn PostConstraint>] {
        &self.post_constraints
    }

    fn cancel_criteria(&self) -> &[Box<dyn CancelCriterion>] {
        &self.cancel_criteria
    }

    fn replication_criteria(&self) -> &[Box<dyn ReplicationCriterion>] {
        &self.replication_criteria
    }

    fn calc_objectives(
        &self,
        configuration: &Configuration,
        responses: &Responses,
    ) -> OptResult<ObjectiveMap> {
        (self.objective_fn)(configuration, responses)
    }
}

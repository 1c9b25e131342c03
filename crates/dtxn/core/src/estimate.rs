use dtxn_types::PartitionId;

/// Opaque procedure-parameter value, as bound by the client. Array-typed
/// parameters are a first-class variant so a `ParamBinding` can address one
/// element of them by index, per `spec.md` §4.5.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Int(i64),
    Str(String),
    Bytes(Vec<u8>),
    Array(Vec<ParamValue>),
}

/// Resolves a statement's bound parameter to the underlying procedure
/// parameter it came from, so two queries' primary-key bindings can be
/// compared by actual value rather than by statement-local position.
#[derive(Debug, Clone, Copy)]
pub struct ParameterMapping {
    /// Index into the procedure's parameter array.
    pub procedure_param_index: usize,
    /// If the procedure parameter is array-typed, the element index within
    /// it; `None` for a scalar parameter.
    pub array_index: Option<usize>,
}

impl ParameterMapping {
    /// Resolves the actual value this mapping points to, given the
    /// procedure's full parameter set.
    pub fn resolve<'a>(&self, procedure_params: &'a [ParamValue]) -> Option<&'a ParamValue> {
        let param = procedure_params.get(self.procedure_param_index)?;
        match (param, self.array_index) {
            (ParamValue::Array(items), Some(idx)) => items.get(idx),
            (value, None) => Some(value),
            _ => None,
        }
    }
}

/// A single predicted query within a transaction's estimate: which
/// statement, which partitions it is predicted to touch, and (if the
/// statement binds a primary key) the mapping back to the procedure's
/// parameters.
#[derive(Debug, Clone)]
pub struct QueryInvocation {
    pub statement_id: u32,
    pub partitions: Vec<PartitionId>,
    pub pk_binding: Option<ParameterMapping>,
}

/// Ordered list of predicted queries for a transaction, produced by an
/// external estimator and consumed read-only by the conflict checkers.
#[derive(Debug, Clone, Default)]
pub struct QueryEstimate {
    queries: Vec<QueryInvocation>,
}

impl QueryEstimate {
    pub fn new(queries: Vec<QueryInvocation>) -> Self {
        Self { queries }
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    /// The queries in this estimate that are predicted to touch `partition`,
    /// in original order, alongside their index in the full list (needed so
    /// the Markov checker's statement-counter lookup stays symmetric between
    /// the two sides of a cross-pair comparison — see `ConflictChecker`).
    pub fn filtered_to_partition(
        &self,
        partition: PartitionId,
    ) -> impl Iterator<Item = (usize, &QueryInvocation)> {
        self.queries
            .iter()
            .enumerate()
            .filter(move |(_, q)| q.partitions.contains(&partition))
    }

    pub fn get(&self, index: usize) -> Option<&QueryInvocation> {
        self.queries.get(index)
    }
}

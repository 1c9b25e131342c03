use std::sync::Arc;

use dtxn_types::{ConflictKind, PartitionId, ProcedureCatalog};

use crate::txn::TransactionHandle;

/// `can_execute(holder, candidate, partition)`: may `candidate` run
/// speculatively on `partition` while `holder` holds it? Pure: no side
/// effects, callable concurrently from multiple executor threads with no
/// external synchronization.
pub trait ConflictChecker: Send + Sync {
    fn can_execute(
        &self,
        holder: &TransactionHandle,
        candidate: &TransactionHandle,
        partition: PartitionId,
    ) -> bool;
}

/// Table-level checker: uses the catalog's precomputed conflict pairs and
/// the holder's touched-table bitmap on `partition`.
pub struct TableConflictChecker {
    catalog: Arc<ProcedureCatalog>,
}

impl TableConflictChecker {
    pub fn new(catalog: Arc<ProcedureCatalog>) -> Self {
        Self { catalog }
    }
}

impl ConflictChecker for TableConflictChecker {
    fn can_execute(
        &self,
        holder: &TransactionHandle,
        candidate: &TransactionHandle,
        partition: PartitionId,
    ) -> bool {
        // A procedure that is not read-only always conflicts with itself.
        if holder.procedure == candidate.procedure && self.catalog.self_conflicts(holder.procedure)
        {
            return false;
        }

        if !self.catalog.has_any_conflict(holder.procedure, candidate.procedure) {
            return true;
        }

        let Some(holder_touched) = holder.touched(partition) else {
            // Holder has not touched anything on this partition yet: there
            // is nothing for the candidate to conflict with.
            return true;
        };

        let forward = self.catalog.conflict_pairs(holder.procedure, candidate.procedure);
        let backward = self.catalog.conflict_pairs(candidate.procedure, holder.procedure);
        for pair in forward.iter().chain(backward.iter()) {
            match pair.kind {
                ConflictKind::Always => return false,
                ConflictKind::ReadWrite | ConflictKind::WriteWrite => {
                    if holder_touched.read.intersects_any(&pair.tables)
                        || holder_touched.write.intersects_any(&pair.tables)
                    {
                        return false;
                    }
                }
            }
        }
        true
    }
}

/// Markov (query-estimate) checker: consults both transactions' predicted
/// queries filtered to `partition` rather than the static table catalog.
pub struct MarkovConflictChecker {
    catalog: Arc<ProcedureCatalog>,
}

impl MarkovConflictChecker {
    pub fn new(catalog: Arc<ProcedureCatalog>) -> Self {
        Self { catalog }
    }
}

impl ConflictChecker for MarkovConflictChecker {
    fn can_execute(
        &self,
        holder: &TransactionHandle,
        candidate: &TransactionHandle,
        partition: PartitionId,
    ) -> bool {
        if holder.read_only && candidate.read_only {
            return true;
        }

        let (Some(holder_estimate), Some(candidate_estimate)) =
            (holder.estimate.as_ref(), candidate.estimate.as_ref())
        else {
            // Missing estimator state on either side means "cannot prove
            // safe" -> reject.
            return false;
        };

        let forward = self.catalog.conflict_pairs(holder.procedure, candidate.procedure);
        let backward = self.catalog.conflict_pairs(candidate.procedure, holder.procedure);
        if forward.is_empty() && backward.is_empty() {
            return true;
        }

        for pair in forward.iter().chain(backward.iter()) {
            if pair.kind == ConflictKind::Always {
                return false;
            }
            for (_, q0) in holder_estimate.filtered_to_partition(partition) {
                for (_, q1) in candidate_estimate.filtered_to_partition(partition) {
                    // The inner loop resolves each side's own statement
                    // binding against its own parameter set; spec.md §9
                    // resolves the source's asymmetric-lookup open question
                    // in favor of this symmetric form.
                    let Some(b0) = q0.pk_binding else { return false };
                    let Some(b1) = q1.pk_binding else { return false };
                    let Some(v0) = b0.resolve(&holder.params) else { return false };
                    let Some(v1) = b1.resolve(&candidate.params) else { return false };
                    if v0 == v1 {
                        return false;
                    }
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimate::{ParamValue, ParameterMapping, QueryEstimate, QueryInvocation};
    use dtxn_types::ConflictPair;
    use std::collections::HashMap;

    fn catalog_with_pair(kind: ConflictKind, tables: Vec<u32>, read_only: &[(u32, bool)]) -> Arc<ProcedureCatalog> {
        let read_only_map: HashMap<u32, bool> = read_only.iter().copied().collect();
        Arc::new(ProcedureCatalog::build(
            read_only_map,
            vec![ConflictPair { proc0: 1, proc1: 2, tables, kind }],
        ))
    }

    #[test]
    fn table_checker_admits_when_no_registered_conflict() {
        let catalog = Arc::new(ProcedureCatalog::build(HashMap::from([(1, false), (2, false)]), vec![]));
        let checker = TableConflictChecker::new(catalog);
        let holder = TransactionHandle::new_local(1, 0, vec![0], false, 1, vec![]);
        let candidate = TransactionHandle::new_local(2, 0, vec![0], false, 2, vec![]);
        assert!(checker.can_execute(&holder, &candidate, 0));
    }

    #[test]
    fn table_checker_rejects_on_write_write_overlap_with_prior_write() {
        let catalog = catalog_with_pair(ConflictKind::WriteWrite, vec![42], &[(1, false), (2, false)]);
        let checker = TableConflictChecker::new(catalog);
        let mut holder = TransactionHandle::new_local(1, 0, vec![0], false, 1, vec![]);
        holder.mark_touched(0, 42, true);
        let candidate = TransactionHandle::new_local(2, 0, vec![0], false, 2, vec![]);
        assert!(!checker.can_execute(&holder, &candidate, 0));
    }

    #[test]
    fn table_checker_admits_on_disjoint_tables() {
        let catalog = catalog_with_pair(ConflictKind::WriteWrite, vec![42], &[(1, false), (2, false)]);
        let checker = TableConflictChecker::new(catalog);
        let mut holder = TransactionHandle::new_local(1, 0, vec![0], false, 1, vec![]);
        holder.mark_touched(0, 7, true); // VOTES, disjoint from conflicting table 42
        let candidate = TransactionHandle::new_local(2, 0, vec![0], false, 2, vec![]);
        assert!(checker.can_execute(&holder, &candidate, 0));
    }

    #[test]
    fn table_checker_forces_self_conflict_for_non_read_only_same_procedure() {
        let catalog = Arc::new(ProcedureCatalog::build(HashMap::from([(1, false)]), vec![]));
        let checker = TableConflictChecker::new(catalog);
        let holder = TransactionHandle::new_local(1, 0, vec![0], false, 1, vec![]);
        let candidate = TransactionHandle::new_local(2, 0, vec![0], false, 1, vec![]);
        assert!(!checker.can_execute(&holder, &candidate, 0));
    }

    fn invocation(statement_id: u32, partition: PartitionId) -> QueryInvocation {
        QueryInvocation {
            statement_id,
            partitions: vec![partition],
            pk_binding: Some(ParameterMapping { procedure_param_index: 0, array_index: None }),
        }
    }

    #[test]
    fn markov_checker_rejects_equal_key_binding() {
        let catalog = catalog_with_pair(ConflictKind::ReadWrite, vec![1], &[(1, false), (2, false)]);
        let checker = MarkovConflictChecker::new(catalog);
        let mut holder = TransactionHandle::new_local(1, 0, vec![0], false, 1, vec![ParamValue::Int(5)]);
        holder.estimate = Some(QueryEstimate::new(vec![invocation(10, 0)]));
        let mut candidate = TransactionHandle::new_local(2, 0, vec![0], false, 2, vec![ParamValue::Int(5)]);
        candidate.estimate = Some(QueryEstimate::new(vec![invocation(11, 0)]));
        assert!(!checker.can_execute(&holder, &candidate, 0));
    }

    #[test]
    fn markov_checker_admits_differing_key_binding() {
        let catalog = catalog_with_pair(ConflictKind::ReadWrite, vec![1], &[(1, false), (2, false)]);
        let checker = MarkovConflictChecker::new(catalog);
        let mut holder = TransactionHandle::new_local(1, 0, vec![0], false, 1, vec![ParamValue::Int(5)]);
        holder.estimate = Some(QueryEstimate::new(vec![invocation(10, 0)]));
        let mut candidate = TransactionHandle::new_local(2, 0, vec![0], false, 2, vec![ParamValue::Int(9)]);
        candidate.estimate = Some(QueryEstimate::new(vec![invocation(11, 0)]));
        assert!(checker.can_execute(&holder, &candidate, 0));
    }

    #[test]
    fn markov_checker_admits_when_both_read_only() {
        let catalog = catalog_with_pair(ConflictKind::Always, vec![1], &[(1, true), (2, true)]);
        let checker = MarkovConflictChecker::new(catalog);
        let holder = TransactionHandle::new_local(1, 0, vec![0], true, 1, vec![]);
        let candidate = TransactionHandle::new_local(2, 0, vec![0], true, 2, vec![]);
        assert!(checker.can_execute(&holder, &candidate, 0));
    }

    #[test]
    fn markov_checker_rejects_on_missing_estimator_state() {
        let catalog = catalog_with_pair(ConflictKind::ReadWrite, vec![1], &[(1, false), (2, false)]);
        let checker = MarkovConflictChecker::new(catalog);
        let holder = TransactionHandle::new_local(1, 0, vec![0], false, 1, vec![]);
        let candidate = TransactionHandle::new_local(2, 0, vec![0], false, 2, vec![]);
        assert!(!checker.can_execute(&holder, &candidate, 0));
    }
}

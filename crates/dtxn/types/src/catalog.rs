use std::collections::HashMap;

/// Static catalog identifier for a stored procedure.
pub type ProcedureId = u32;

/// Static catalog identifier for a table.
pub type TableId = u32;

/// Kind of static conflict declared between an ordered pair of procedures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConflictKind {
    ReadWrite,
    WriteWrite,
    /// The two procedures always conflict regardless of parameter values;
    /// used by the Markov checker for pairs where a safe-disjoint proof is
    /// never possible (e.g. full-table scans).
    Always,
}

/// Catalog data for an ordered pair of procedures: the set of tables they
/// may conflict over, and the kind of conflict.
#[derive(Debug, Clone)]
pub struct ConflictPair {
    pub proc0: ProcedureId,
    pub proc1: ProcedureId,
    pub tables: Vec<TableId>,
    pub kind: ConflictKind,
}

/// Static, immutable-after-construction catalog of procedures, tables, and
/// declared conflict pairs. Shared freely across executor threads once
/// built; nothing here is mutated after `ProcedureCatalog::build`.
#[derive(Debug, Clone, Default)]
pub struct ProcedureCatalog {
    read_only: HashMap<ProcedureId, bool>,
    pairs: HashMap<(ProcedureId, ProcedureId), Vec<ConflictPair>>,
}

impl ProcedureCatalog {
    pub fn build(read_only: HashMap<ProcedureId, bool>, pairs: Vec<ConflictPair>) -> Self {
        let mut by_pair: HashMap<(ProcedureId, ProcedureId), Vec<ConflictPair>> = HashMap::new();
        for pair in pairs {
            by_pair.entry((pair.proc0, pair.proc1)).or_default().push(pair);
        }
        Self { read_only, pairs: by_pair }
    }

    pub fn is_read_only(&self, proc: ProcedureId) -> bool {
        self.read_only.get(&proc).copied().unwrap_or(false)
    }

    /// A procedure that is not read-only always conflicts with itself.
    pub fn self_conflicts(&self, proc: ProcedureId) -> bool {
        !self.is_read_only(proc)
    }

    pub fn conflict_pairs(&self, proc0: ProcedureId, proc1: ProcedureId) -> &[ConflictPair] {
        self.pairs.get(&(proc0, proc1)).map_or(&[], |v| v.as_slice())
    }

    pub fn has_any_conflict(&self, proc0: ProcedureId, proc1: ProcedureId) -> bool {
        self.pairs.contains_key(&(proc0, proc1)) || self.pairs.contains_key(&(proc1, proc0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_build_is_pure_function_of_input() {
        let read_only = HashMap::from([(1, true), (2, false)]);
        let pairs = vec![ConflictPair {
            proc0: 1,
            proc1: 2,
            tables: vec![10],
            kind: ConflictKind::ReadWrite,
        }];
        let a = ProcedureCatalog::build(read_only.clone(), pairs.clone());
        let b = ProcedureCatalog::build(read_only, pairs);
        assert_eq!(a.is_read_only(1), b.is_read_only(1));
        assert_eq!(a.conflict_pairs(1, 2).len(), b.conflict_pairs(1, 2).len());
    }

    #[test]
    fn non_read_only_procedure_self_conflicts() {
        let catalog = ProcedureCatalog::build(HashMap::from([(1, false)]), vec![]);
        assert!(catalog.self_conflicts(1));
    }

    #[test]
    fn read_only_procedure_does_not_self_conflict() {
        let catalog = ProcedureCatalog::build(HashMap::from([(1, true)]), vec![]);
        assert!(!catalog.self_conflicts(1));
    }
}

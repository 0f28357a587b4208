//------------ Types for Statistics -----------------------------------------

use std::fmt;

use serde_derive::Serialize;

use crate::tables::{TableId, TableType};

//------------ TableStats ----------------------------------------------------

/// A snapshot of one table of a pipeline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableStats {
    pub id: TableId,
    pub name: String,
    pub table_type: TableType,
    pub parent: Option<TableId>,
    // The number of routes stored by the table itself. Zero for tables that
    // only forward.
    pub routes: usize,
}

impl fmt::Display for TableStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:>5} {:<8} {:<24} {:>8}",
            self.id.to_string(),
            self.table_type.to_string(),
            self.name,
            self.routes
        )?;
        if let Some(parent) = self.parent {
            write!(f, " -> {}", parent)?;
        }
        Ok(())
    }
}

//------------ Counters ------------------------------------------------------
//
// Everything the protocols fed into a RIB, and the background work that
// followed from it.

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Counters {
    pub(crate) routes_added: usize,
    pub(crate) routes_deleted: usize,
    pub(crate) routes_replaced: usize,
    pub(crate) background_steps: usize,
}

impl Counters {
    pub fn routes_added(&self) -> usize {
        self.routes_added
    }

    pub fn routes_deleted(&self) -> usize {
        self.routes_deleted
    }

    pub fn routes_replaced(&self) -> usize {
        self.routes_replaced
    }

    /// The number of bounded background steps executed.
    pub fn background_steps(&self) -> usize {
        self.background_steps
    }

    pub(crate) fn inc_added(&mut self) {
        self.routes_added += 1;
    }

    pub(crate) fn inc_deleted(&mut self) {
        self.routes_deleted += 1;
    }

    pub(crate) fn inc_replaced(&mut self) {
        self.routes_replaced += 1;
    }

    pub(crate) fn inc_background_steps(&mut self) {
        self.background_steps += 1;
    }
}

impl std::ops::AddAssign for Counters {
    fn add_assign(&mut self, rhs: Self) {
        self.routes_added += rhs.routes_added;
        self.routes_deleted += rhs.routes_deleted;
        self.routes_replaced += rhs.routes_replaced;
        self.background_steps += rhs.background_steps;
    }
}

impl std::ops::Add for Counters {
    type Output = Counters;

    fn add(mut self, rhs: Self) -> Self::Output {
        self += rhs;
        self
    }
}

impl fmt::Display for Counters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "routes added:\t{}", self.routes_added)?;
        writeln!(f, "routes deleted:\t{}", self.routes_deleted)?;
        writeln!(f, "routes replaced:\t{}", self.routes_replaced)?;
        writeln!(f, "background steps:\t{}", self.background_steps)
    }
}

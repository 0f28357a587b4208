//------------ Background tasks ----------------------------------------------
//
// Work that is proportional to the size of a table never runs inside a
// single call. It is queued here as a task, and executed one bounded step
// at a time by `Pipeline::run_once`, interleaved with whatever else the
// event loop driving the pipeline has to do.

use std::collections::VecDeque;
use std::fmt;

use crate::tables::{ConsumerId, TableId};
use crate::types::PrefixId;
use crate::AddressFamily;

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum BackgroundTask<AF: AddressFamily> {
    /// Withdraw a batch of routes out of a deletion table.
    DeletionPass { table: TableId },
    /// Re-evaluate a batch of routes of a policy table. Dead once the
    /// table starts a newer push.
    PolicyPush { table: TableId, epoch: u64 },
    /// Dump the winners of a decision table to one consumer of a
    /// redistribution table. Dead once the consumer is removed.
    Dump {
        decision: TableId,
        redist: TableId,
        consumer: ConsumerId,
    },
    /// Delete the routes of older generations out of an origin table.
    /// Dead once the origin moves on to a newer generation.
    StaleSweep {
        origin: TableId,
        genid: u32,
        cursor: Option<PrefixId<AF>>,
    },
}

impl<AF: AddressFamily> fmt::Display for BackgroundTask<AF> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackgroundTask::DeletionPass { table } => {
                write!(f, "deletion pass on {}", table)
            }
            BackgroundTask::PolicyPush { table, epoch } => {
                write!(f, "policy push {} on {}", epoch, table)
            }
            BackgroundTask::Dump {
                decision,
                redist,
                consumer,
            } => write!(f, "dump of {} to {} of {}", decision, consumer, redist),
            BackgroundTask::StaleSweep { origin, genid, .. } => {
                write!(f, "stale sweep before genid {} on {}", genid, origin)
            }
        }
    }
}

/// What to do with a task after one step of it ran.
pub(crate) enum TaskStatus<AF: AddressFamily> {
    Continue(BackgroundTask<AF>),
    Done,
}

/// A round-robin queue of background tasks: a task that needs more steps
/// goes to the back of the queue.
pub(crate) struct TaskQueue<AF: AddressFamily> {
    tasks: VecDeque<BackgroundTask<AF>>,
}

impl<AF: AddressFamily> TaskQueue<AF> {
    pub(crate) fn new() -> Self {
        Self {
            tasks: VecDeque::new(),
        }
    }

    pub(crate) fn push(&mut self, task: BackgroundTask<AF>) {
        self.tasks.push_back(task);
    }

    pub(crate) fn pop(&mut self) -> Option<BackgroundTask<AF>> {
        self.tasks.pop_front()
    }

    pub(crate) fn len(&self) -> usize {
        self.tasks.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

use log::debug;
use roaring::RoaringBitmap;

use super::decision::BranchId;
use crate::types::{Meta, PrefixId, Protocol, RouteEntry};
use crate::AddressFamily;

//------------ DumpIterator --------------------------------------------------

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Progress<AF: AddressFamily> {
    Pending,
    /// The branch went down while being dumped, after this net.
    Partial(Option<PrefixId<AF>>),
    Complete,
}

#[derive(Clone, Debug)]
struct DumpBranch<AF: AddressFamily> {
    id: BranchId,
    protocol: Protocol,
    progress: Progress<AF>,
}

/// A cursor over all routes of all branches of a decision table, used to
/// bring a newly attached consumer up to date in the background.
///
/// The branches are snapshotted when the dump starts and walked one at a
/// time, in net order. A branch that goes down during the dump is skipped
/// from then on. A branch (or a generation of a branch) that comes up
/// during the dump is not part of it: its routes reach the consumer as
/// ordinary changes. Routes of a generation that went down before the dump
/// started can never win, so they are never handed out either.
///
/// While the dump runs, [DumpIterator::route_change_is_valid] tells whether
/// an ordinary change concerns a route the consumer has already been given
/// (or will never be given by the dump), and so must be passed on.
///
/// A branch that went down keeps its published winners until the deletion
/// table withdraws them. The consumer only got the ones dumped before the
/// branch went down, so the iterator keeps filtering the changes of such a
/// branch, even after the dump itself is done, until the protocol's down
/// is complete. See [DumpIterator::is_filtering].
#[derive(Clone, Debug)]
pub struct DumpIterator<AF: AddressFamily> {
    branches: Vec<DumpBranch<AF>>,
    current: usize,
    position: Option<PrefixId<AF>>,
    down: RoaringBitmap,
}

impl<AF: AddressFamily> DumpIterator<AF> {
    pub(crate) fn new(
        branches: impl IntoIterator<Item = (BranchId, Protocol)>,
    ) -> Self {
        Self {
            branches: branches
                .into_iter()
                .map(|(id, protocol)| DumpBranch {
                    id,
                    protocol,
                    progress: Progress::Pending,
                })
                .collect(),
            current: 0,
            position: None,
            down: RoaringBitmap::new(),
        }
    }

    pub fn is_done(&self) -> bool {
        self.current >= self.branches.len()
    }

    /// Returns true while a branch that went down before it was dumped
    /// completely still has routes on their way out.
    pub fn is_filtering(&self) -> bool {
        self.branches.iter().any(|b| {
            self.down.contains(b.id.0) && b.progress != Progress::Complete
        })
    }

    /// The branch to dump from now, skipping branches that went down.
    pub(crate) fn current_branch(&mut self) -> Option<BranchId> {
        loop {
            let branch = self.branches.get(self.current)?;
            if !self.down.contains(branch.id.0) {
                return Some(branch.id);
            }
            self.current += 1;
            self.position = None;
        }
    }

    /// The last net dumped from the current branch.
    pub(crate) fn position(&self) -> Option<PrefixId<AF>> {
        self.position
    }

    pub(crate) fn set_position(&mut self, net: PrefixId<AF>) {
        self.position = Some(net);
    }

    /// The current branch has been dumped completely.
    pub(crate) fn finish_branch(&mut self) {
        if let Some(branch) = self.branches.get_mut(self.current) {
            branch.progress = Progress::Complete;
        }
        self.current += 1;
        self.position = None;
    }

    /// Returns true if `route`, found in the current branch, belongs to the
    /// generation the dump started with. Routes of newer generations reach
    /// the consumer as ordinary changes.
    pub(crate) fn in_snapshot<M: Meta>(&self, route: &RouteEntry<AF, M>) -> bool {
        self.branches
            .get(self.current)
            .is_some_and(|b| route.genid() <= b.protocol.genid())
    }

    /// Skip all remaining routes of the branches of `protocol`.
    pub fn peering_went_down(&mut self, protocol: &Protocol) {
        for (idx, branch) in self.branches.iter_mut().enumerate() {
            if branch.protocol != *protocol || self.down.contains(branch.id.0)
            {
                continue;
            }
            if idx == self.current {
                branch.progress = Progress::Partial(self.position);
            }
            debug!("dump skips branch of {} that went down", protocol);
            self.down.insert(branch.id.0);
        }
    }

    /// All routes of the generations of `protocol` that went down have
    /// been withdrawn. Changes to its branches need no filtering anymore.
    pub fn peering_down_complete(&mut self, protocol: &Protocol) {
        for branch in self.branches.iter_mut() {
            if branch.protocol == *protocol
                && self.down.contains(branch.id.0)
                && branch.progress != Progress::Complete
            {
                debug!("dump stops filtering the branch of {}", protocol);
                branch.progress = Progress::Complete;
            }
        }
    }

    /// Returns true if a change to `route` must be passed on to the
    /// consumer being dumped to.
    pub fn route_change_is_valid<M: Meta>(
        &self,
        route: &RouteEntry<AF, M>,
    ) -> bool {
        let Some((idx, branch)) = self
            .branches
            .iter()
            .enumerate()
            .find(|(_, b)| b.protocol == *route.protocol())
        else {
            // Not part of the snapshot.
            return true;
        };

        if route.genid() > branch.protocol.genid() {
            return true;
        }

        let net = route.net();
        match branch.progress {
            Progress::Complete => true,
            Progress::Partial(pos) => pos.is_some_and(|p| net <= p),
            Progress::Pending => {
                idx == self.current
                    && !self.down.contains(branch.id.0)
                    && self.position.is_some_and(|p| net <= p)
            }
        }
    }
}

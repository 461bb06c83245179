use chrono::Utc;
use tracing::{debug, warn};

use crate::context::FlushContext;
use crate::error::BehaviorError;
use crate::store::{Assignment, BackingStore, Filter};
use crate::traits::{FieldSlot, Managed};
use crate::uow::{load_managed, patch_field, UnitOfWork};
use crate::value::FieldValue;

/// Store transaction that must be finished explicitly.
pub struct LockedTransaction<'s, S: BackingStore + ?Sized> {
    store: &'s S,
    open: bool,
}

impl<'s, S: BackingStore + ?Sized> LockedTransaction<'s, S> {
    pub async fn begin(store: &'s S) -> Result<Self, BehaviorError> {
        store.begin().await?;
        Ok(Self { store, open: true })
    }

    pub async fn commit(mut self) -> Result<(), BehaviorError> {
        self.open = false;
        self.store.commit().await
    }

    pub async fn rollback(mut self) -> Result<(), BehaviorError> {
        self.open = false;
        self.store.rollback().await
    }
}

impl<S: BackingStore + ?Sized> Drop for LockedTransaction<'_, S> {
    fn drop(&mut self) {
        if self.open {
            warn!("transaction dropped without commit or rollback");
        }
    }
}

/// Time-based advisory lock recorded on a tree root.
///
/// A lock younger than the timeout rejects the flush with
/// [`BehaviorError::TreeLocked`]. The timestamp is written and cleared inside
/// the same flush transaction, so other transactions only see it when the
/// store does not isolate uncommitted writes. Under isolation the guarantee is
/// the row lock taken by the UPDATE on the root, held until commit.
pub(crate) struct RootLock<M> {
    slot: FieldSlot<M>,
    timeout_secs: i64,
}

impl<M: Managed> RootLock<M> {
    pub(crate) fn new(slot: FieldSlot<M>, timeout_secs: i64) -> Self {
        Self { slot, timeout_secs }
    }

    pub(crate) async fn acquire<S>(
        &self,
        ctx: &mut FlushContext,
        uow: &mut dyn UnitOfWork<M>,
        store: &S,
        root: &FieldValue,
    ) -> Result<(), BehaviorError>
    where
        S: BackingStore + ?Sized,
    {
        if ctx.held_locks.contains(root) {
            return Ok(());
        }
        let Some(node) = load_managed(uow, store, root).await? else {
            return Ok(());
        };

        let now = Utc::now().timestamp();
        if let Some(locked_at) = self.slot.read(&node).as_int() {
            if now - locked_at < self.timeout_secs {
                return Err(BehaviorError::TreeLocked(format!(
                    "tree [{root}] of `{}` is locked since {locked_at}",
                    M::collection()
                )));
            }
        }

        let filter = Filter::new().eq(M::identifier_field(), root.clone());
        store
            .update_where(
                M::collection(),
                &filter,
                &[Assignment::Set(self.slot.name().to_owned(), FieldValue::Int(now))],
            )
            .await?;
        patch_field(uow, root, &self.slot, FieldValue::Int(now))?;
        ctx.held_locks.push(root.clone());
        debug!(collection = M::collection(), root = %root, "tree locked");
        Ok(())
    }

    pub(crate) async fn release_all<S>(
        &self,
        ctx: &mut FlushContext,
        uow: &mut dyn UnitOfWork<M>,
        store: &S,
    ) -> Result<(), BehaviorError>
    where
        S: BackingStore + ?Sized,
    {
        for root in std::mem::take(&mut ctx.held_locks) {
            let filter = Filter::new().eq(M::identifier_field(), root.clone());
            store
                .update_where(
                    M::collection(),
                    &filter,
                    &[Assignment::Set(self.slot.name().to_owned(), FieldValue::Null)],
                )
                .await?;
            patch_field(uow, &root, &self.slot, FieldValue::Null)?;
            debug!(collection = M::collection(), root = %root, "tree unlocked");
        }
        Ok(())
    }
}

use async_trait::async_trait;
use diskherd_core::Result;

/// What happened to an entity during one converge pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsureOutcome {
    Created,
    Updated,
    Unchanged,
}

impl EnsureOutcome {
    pub fn changed(self) -> bool {
        !matches!(self, EnsureOutcome::Unchanged)
    }
}

/// Create-if-absent / update-if-different contract. Each reconciler
/// specializes it with its own desired representation and equality.
#[async_trait]
pub trait EntityAdapter: Send + Sync {
    type Entity: Send + Sync;

    async fn create(&self) -> Result<Self::Entity>;
    async fn update(&self, existing: &Self::Entity) -> Result<Self::Entity>;
    async fn up_to_date(&self, existing: &Self::Entity) -> Result<bool>;
}

/// Converge a single entity toward its desired representation.
pub async fn ensure_entity<A: EntityAdapter>(
    adapter: &A,
    existing: Option<A::Entity>,
) -> Result<(A::Entity, EnsureOutcome)> {
    match existing {
        None => Ok((adapter.create().await?, EnsureOutcome::Created)),
        Some(entity) => {
            if adapter.up_to_date(&entity).await? {
                Ok((entity, EnsureOutcome::Unchanged))
            } else {
                Ok((adapter.update(&entity).await?, EnsureOutcome::Updated))
            }
        }
    }
}

/// Field comparison where an unset desired value means "don't care".
pub fn equal<T: PartialEq>(desired: Option<&T>, current: Option<&T>) -> bool {
    desired.is_none() || desired == current
}

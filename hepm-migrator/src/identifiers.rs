//! Identifier lifecycle manager
//!
//! Assigns, redirects and resolves persistent identifiers. Every operation
//! runs on the caller's connection so it commits or rolls back together
//! with the record being migrated.

use std::collections::HashSet;

use sqlx::SqliteConnection;
use tracing::debug;
use uuid::Uuid;

use crate::db::{pidstore, records};
use crate::error::{MigrationError, Result};
use crate::model::{PidKey, PidStatus};

/// Upper bound on redirect hops followed by [`IdentifierManager::resolve`]
pub const MAX_REDIRECT_HOPS: usize = 10;

/// Terminal identifier reached by following redirects
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub key: PidKey,
    pub uuid: Uuid,
    /// Number of redirects followed
    pub hops: usize,
}

/// What a redirect did
#[derive(Debug, Clone, PartialEq)]
pub struct RedirectOutcome {
    /// Record the old identifier now leads to
    pub survivor: Uuid,
    /// Record tombstoned by the merge, if the old identifier owned a live one
    pub deleted_record: Option<Uuid>,
    /// Whether the old identifier now leads somewhere else than before
    pub changed: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct IdentifierManager {
    redirection_enabled: bool,
}

impl IdentifierManager {
    pub fn new(redirection_enabled: bool) -> Self {
        Self { redirection_enabled }
    }

    pub fn redirection_enabled(&self) -> bool {
        self.redirection_enabled
    }

    /// Claim `key` for `uuid`
    ///
    /// Fails with `Conflict` naming the owner when another live record
    /// already holds the identifier.
    pub async fn assign(&self, conn: &mut SqliteConnection, key: &PidKey, uuid: Uuid) -> Result<()> {
        if pidstore::try_register(&mut *conn, key, uuid).await? {
            debug!(pid = %key, uuid = %uuid, "Identifier registered");
            return Ok(());
        }

        let existing = pidstore::get(&mut *conn, key).await?;
        Err(MigrationError::Conflict {
            pid_type: key.pid_type.clone(),
            pid_value: key.pid_value.clone(),
            existing_uuid: existing.map(|pid| pid.object_uuid).unwrap_or_else(Uuid::nil),
        })
    }

    /// Follow redirects from `key` to its terminal `REGISTERED` identifier
    pub async fn resolve(&self, conn: &mut SqliteConnection, key: &PidKey) -> Result<Uuid> {
        Ok(self.resolve_terminal(conn, key).await?.uuid)
    }

    /// Like [`resolve`](Self::resolve) but also reports the terminal key
    pub async fn resolve_terminal(&self, conn: &mut SqliteConnection, key: &PidKey) -> Result<Resolved> {
        let mut visited: HashSet<PidKey> = HashSet::new();
        let mut current = key.clone();

        for hops in 0..=MAX_REDIRECT_HOPS {
            if !visited.insert(current.clone()) {
                return Err(redirect_loop(key, &current, conn).await);
            }

            let pid = pidstore::get(&mut *conn, &current)
                .await?
                .ok_or_else(|| MigrationError::not_found(&current.pid_type, &current.pid_value))?;

            match pid.status {
                PidStatus::Registered => {
                    return Ok(Resolved {
                        key: current,
                        uuid: pid.object_uuid,
                        hops,
                    })
                }
                PidStatus::Deleted => {
                    return Err(MigrationError::not_found(&current.pid_type, &current.pid_value))
                }
                PidStatus::Redirected => match pid.redirect_target {
                    Some(target) => current = target,
                    None => {
                        return Err(MigrationError::not_found(&current.pid_type, &current.pid_value))
                    }
                },
            }
        }

        Err(redirect_loop(key, &current, conn).await)
    }

    /// Merge `old` into `new`
    ///
    /// With redirection enabled the old identifier becomes `REDIRECTED`
    /// (created if it never existed); otherwise it becomes `DELETED`. In both
    /// cases the record it owned is marked deleted and its other identifiers
    /// are released so the survivor can claim them.
    pub async fn redirect(
        &self,
        conn: &mut SqliteConnection,
        old: &PidKey,
        new: &PidKey,
    ) -> Result<RedirectOutcome> {
        if old == new {
            return Err(MigrationError::Transform(format!(
                "identifier {} cannot be redirected to itself",
                old
            )));
        }

        // Refuses a redirect whose target chain already passes through `old`
        let survivor = self.walk_avoiding(conn, new, old).await?;

        let existing = pidstore::get(&mut *conn, old).await?;
        let owned = existing
            .as_ref()
            .filter(|pid| pid.status != PidStatus::Redirected)
            .map(|pid| pid.object_uuid);

        if owned == Some(survivor.uuid) {
            return Err(MigrationError::Transform(format!(
                "identifiers {} and {} belong to the same record",
                old, new
            )));
        }

        let changed = if self.redirection_enabled {
            let unchanged = existing.as_ref().is_some_and(|pid| {
                pid.status == PidStatus::Redirected && pid.redirect_target.as_ref() == Some(&survivor.key)
            });
            pidstore::upsert_redirect(&mut *conn, old, &survivor.key, survivor.uuid).await?;
            !unchanged
        } else if existing.is_some() {
            pidstore::mark_deleted(&mut *conn, old).await?
        } else {
            false
        };

        let mut deleted_record = None;
        if let Some(old_uuid) = owned {
            let live = records::get(&mut *conn, old_uuid).await?.is_some_and(|record| !record.deleted);
            if live && records::mark_deleted(&mut *conn, old_uuid).await?.is_some() {
                deleted_record = Some(old_uuid);
            }
            for pid in pidstore::for_object(&mut *conn, old_uuid).await? {
                if pid.key != *old && pid.status == PidStatus::Registered {
                    pidstore::mark_deleted(&mut *conn, &pid.key).await?;
                }
            }
        }

        debug!(
            old = %old,
            new = %survivor.key,
            survivor = %survivor.uuid,
            redirected = self.redirection_enabled,
            "Identifier merged"
        );

        Ok(RedirectOutcome {
            survivor: survivor.uuid,
            deleted_record,
            changed,
        })
    }

    /// Register `wanted` for `uuid` and release what the record no longer carries
    ///
    /// Only identifiers of the types present in `managed_types` are released.
    pub async fn sync_record_pids(
        &self,
        conn: &mut SqliteConnection,
        uuid: Uuid,
        wanted: &[PidKey],
        managed_types: &[&str],
    ) -> Result<()> {
        for key in wanted {
            self.assign(conn, key, uuid).await?;
        }

        for pid in pidstore::for_object(&mut *conn, uuid).await? {
            if pid.status == PidStatus::Registered
                && managed_types.contains(&pid.key.pid_type.as_str())
                && !wanted.contains(&pid.key)
            {
                debug!(pid = %pid.key, uuid = %uuid, "Releasing identifier no longer carried");
                pidstore::mark_deleted(&mut *conn, &pid.key).await?;
            }
        }

        Ok(())
    }

    /// Mark every live identifier of `uuid` deleted
    pub async fn release_all(&self, conn: &mut SqliteConnection, uuid: Uuid) -> Result<usize> {
        let mut released = 0;
        for pid in pidstore::for_object(&mut *conn, uuid).await? {
            if pid.status == PidStatus::Registered && pidstore::mark_deleted(&mut *conn, &pid.key).await? {
                released += 1;
            }
        }
        Ok(released)
    }

    /// Record that currently owns `key`, whatever its status
    ///
    /// Used to find the record to update when re-migrating a record whose
    /// identifier was released by a deletion. Redirected identifiers own
    /// nothing.
    pub async fn owner_of(&self, conn: &mut SqliteConnection, key: &PidKey) -> Result<Option<Uuid>> {
        Ok(pidstore::get(&mut *conn, key)
            .await?
            .filter(|pid| pid.status != PidStatus::Redirected)
            .map(|pid| pid.object_uuid))
    }

    async fn walk_avoiding(
        &self,
        conn: &mut SqliteConnection,
        start: &PidKey,
        forbidden: &PidKey,
    ) -> Result<Resolved> {
        let mut current = start.clone();
        for _ in 0..=MAX_REDIRECT_HOPS {
            let Some(pid) = pidstore::get(&mut *conn, &current).await? else {
                break;
            };
            match (pid.status, pid.redirect_target) {
                (PidStatus::Redirected, Some(target)) => {
                    if target == *forbidden {
                        return Err(MigrationError::Conflict {
                            pid_type: forbidden.pid_type.clone(),
                            pid_value: forbidden.pid_value.clone(),
                            existing_uuid: pid.object_uuid,
                        });
                    }
                    current = target;
                }
                _ => break,
            }
        }
        self.resolve_terminal(conn, start).await
    }
}

async fn redirect_loop(start: &PidKey, at: &PidKey, conn: &mut SqliteConnection) -> MigrationError {
    let existing_uuid = match pidstore::get(&mut *conn, at).await {
        Ok(Some(pid)) => pid.object_uuid,
        _ => Uuid::nil(),
    };
    tracing::warn!(pid = %start, at = %at, "Redirect chain loops or exceeds hop limit");
    MigrationError::Conflict {
        pid_type: start.pid_type.clone(),
        pid_value: start.pid_value.clone(),
        existing_uuid,
    }
}

//! PostgreSQL storage backend with connection pooling
//!
//! Constraint violations are translated into the domain error kinds at
//! this boundary: unique violations become `AlreadyExists`, foreign-key
//! violations become `InvalidReference`, not-null violations become
//! `MissingRequiredField`. Provisioning plans run inside one database
//! transaction.

use super::{
    AssignmentStore, InvitationStore, MembershipStore, OrganizationStore, ProvisionPlan,
    ProvisionStore, RoleStore, TeamStore,
};
use crate::error::{AuthzError, Result};
use async_trait::async_trait;
use atrium_core::types::{
    ActionKind, Invitation, OrgMembership, Organization, Permission, PermissionScope,
    PrincipalRef, ResourceKind, Role, RoleAssignment, RoleScope, Team, TeamMembership, Workspace,
};
use atrium_core::{
    AssignmentId, CoreError, InvitationId, MembershipId, OrgId, PermissionId, RoleId, TeamId,
    UserId, WorkspaceId,
};
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::time::Duration;
use tracing::info;

/// PostgreSQL storage backend
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect to the database
    ///
    /// # Arguments
    /// * `database_url` - PostgreSQL connection string
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(25)
            .min_connections(5)
            .acquire_timeout(Duration::from_secs(3))
            .idle_timeout(Duration::from_secs(600))
            .max_lifetime(Duration::from_secs(1800))
            .connect(database_url)
            .await
            .map_err(|e| AuthzError::Database(format!("failed to connect to database: {e}")))?;

        info!("Connected to PostgreSQL store");
        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AuthzError::Database(format!("migration failed: {e}")))?;
        Ok(())
    }

    /// Database pool for advanced queries
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Translate a database error into the domain error kinds
fn map_db_err(context: &str, err: sqlx::Error) -> AuthzError {
    if let sqlx::Error::Database(db_err) = &err {
        if let Some(code) = db_err.code() {
            match code.as_ref() {
                // unique_violation
                "23505" => return CoreError::AlreadyExists(context.to_string()).into(),
                // foreign_key_violation
                "23503" => return CoreError::InvalidReference(context.to_string()).into(),
                // not_null_violation
                "23502" => {
                    return CoreError::MissingRequiredField("required column was null").into()
                }
                // check_violation
                "23514" => return CoreError::ValidationFailed(context.to_string()).into(),
                _ => {}
            }
        }
    }
    AuthzError::Database(format!("{context}: {err}"))
}

fn principal_kind(principal: PrincipalRef) -> (&'static str, uuid::Uuid) {
    match principal {
        PrincipalRef::User(id) => ("user", id),
        PrincipalRef::Team(id) => ("team", id),
    }
}

fn principal_from(kind: &str, id: uuid::Uuid) -> Result<PrincipalRef> {
    match kind {
        "user" => Ok(PrincipalRef::User(id)),
        "team" => Ok(PrincipalRef::Team(id)),
        other => Err(AuthzError::Database(format!(
            "unknown principal kind '{other}'"
        ))),
    }
}

fn resource_to_str(resource: ResourceKind) -> &'static str {
    match resource {
        ResourceKind::Organization => "organization",
        ResourceKind::Workspace => "workspace",
        ResourceKind::Entity => "entity",
        ResourceKind::EntityType => "entity_type",
        ResourceKind::Workflow => "workflow",
    }
}

fn resource_from_str(s: &str) -> Result<ResourceKind> {
    match s {
        "organization" => Ok(ResourceKind::Organization),
        "workspace" => Ok(ResourceKind::Workspace),
        "entity" => Ok(ResourceKind::Entity),
        "entity_type" => Ok(ResourceKind::EntityType),
        "workflow" => Ok(ResourceKind::Workflow),
        other => Err(AuthzError::Database(format!(
            "unknown resource kind '{other}'"
        ))),
    }
}

fn action_to_str(action: ActionKind) -> &'static str {
    match action {
        ActionKind::Read => "read",
        ActionKind::Create => "create",
        ActionKind::Update => "update",
        ActionKind::Delete => "delete",
        ActionKind::ManageMembers => "manage_members",
        ActionKind::ManageTeams => "manage_teams",
        ActionKind::ManageRoles => "manage_roles",
        ActionKind::Execute => "execute",
    }
}

fn action_from_str(s: &str) -> Result<ActionKind> {
    match s {
        "read" => Ok(ActionKind::Read),
        "create" => Ok(ActionKind::Create),
        "update" => Ok(ActionKind::Update),
        "delete" => Ok(ActionKind::Delete),
        "manage_members" => Ok(ActionKind::ManageMembers),
        "manage_teams" => Ok(ActionKind::ManageTeams),
        "manage_roles" => Ok(ActionKind::ManageRoles),
        "execute" => Ok(ActionKind::Execute),
        other => Err(AuthzError::Database(format!("unknown action '{other}'"))),
    }
}

fn scope_to_columns(scope: PermissionScope) -> (&'static str, Option<uuid::Uuid>) {
    match scope {
        PermissionScope::OrganizationWide => ("organization_wide", None),
        PermissionScope::WorkspaceWide => ("workspace_wide", None),
        PermissionScope::EntityType(id) => ("entity_type", Some(id)),
        PermissionScope::Unscoped => ("unscoped", None),
    }
}

fn scope_from_columns(mode: &str, entity_type_id: Option<uuid::Uuid>) -> Result<PermissionScope> {
    match (mode, entity_type_id) {
        ("organization_wide", None) => Ok(PermissionScope::OrganizationWide),
        ("workspace_wide", None) => Ok(PermissionScope::WorkspaceWide),
        ("entity_type", Some(id)) => Ok(PermissionScope::EntityType(id)),
        ("unscoped", None) => Ok(PermissionScope::Unscoped),
        (other, _) => Err(AuthzError::Database(format!(
            "inconsistent permission scope '{other}'"
        ))),
    }
}

fn org_from_row(row: &PgRow) -> Result<Organization> {
    Ok(Organization {
        id: row.try_get("id").map_err(|e| map_db_err("organization row", e))?,
        name: row.try_get("name").map_err(|e| map_db_err("organization row", e))?,
        created_by: row
            .try_get("created_by")
            .map_err(|e| map_db_err("organization row", e))?,
        created_at: row
            .try_get("created_at")
            .map_err(|e| map_db_err("organization row", e))?,
        updated_at: row
            .try_get("updated_at")
            .map_err(|e| map_db_err("organization row", e))?,
        deleted_at: row
            .try_get("deleted_at")
            .map_err(|e| map_db_err("organization row", e))?,
    })
}

fn workspace_from_row(row: &PgRow) -> Result<Workspace> {
    Ok(Workspace {
        id: row.try_get("id").map_err(|e| map_db_err("workspace row", e))?,
        org_id: row.try_get("org_id").map_err(|e| map_db_err("workspace row", e))?,
        name: row.try_get("name").map_err(|e| map_db_err("workspace row", e))?,
        created_at: row
            .try_get("created_at")
            .map_err(|e| map_db_err("workspace row", e))?,
        updated_at: row
            .try_get("updated_at")
            .map_err(|e| map_db_err("workspace row", e))?,
        deleted_at: row
            .try_get("deleted_at")
            .map_err(|e| map_db_err("workspace row", e))?,
    })
}

fn membership_from_row(row: &PgRow) -> Result<OrgMembership> {
    Ok(OrgMembership {
        id: row.try_get("id").map_err(|e| map_db_err("membership row", e))?,
        org_id: row.try_get("org_id").map_err(|e| map_db_err("membership row", e))?,
        user_id: row
            .try_get("user_id")
            .map_err(|e| map_db_err("membership row", e))?,
        created_at: row
            .try_get("created_at")
            .map_err(|e| map_db_err("membership row", e))?,
        deleted_at: row
            .try_get("deleted_at")
            .map_err(|e| map_db_err("membership row", e))?,
    })
}

fn team_from_row(row: &PgRow) -> Result<Team> {
    Ok(Team {
        id: row.try_get("id").map_err(|e| map_db_err("team row", e))?,
        org_id: row.try_get("org_id").map_err(|e| map_db_err("team row", e))?,
        name: row.try_get("name").map_err(|e| map_db_err("team row", e))?,
        created_at: row
            .try_get("created_at")
            .map_err(|e| map_db_err("team row", e))?,
        updated_at: row
            .try_get("updated_at")
            .map_err(|e| map_db_err("team row", e))?,
        deleted_at: row
            .try_get("deleted_at")
            .map_err(|e| map_db_err("team row", e))?,
    })
}

fn role_from_row(row: &PgRow) -> Result<Role> {
    let org_id: Option<OrgId> = row
        .try_get("org_id")
        .map_err(|e| map_db_err("role row", e))?;
    Ok(Role {
        id: row.try_get("id").map_err(|e| map_db_err("role row", e))?,
        name: row.try_get("name").map_err(|e| map_db_err("role row", e))?,
        description: row
            .try_get("description")
            .map_err(|e| map_db_err("role row", e))?,
        scope: match org_id {
            Some(org_id) => RoleScope::Organization(org_id),
            None => RoleScope::Global,
        },
        created_at: row
            .try_get("created_at")
            .map_err(|e| map_db_err("role row", e))?,
        updated_at: row
            .try_get("updated_at")
            .map_err(|e| map_db_err("role row", e))?,
        deleted_at: row
            .try_get("deleted_at")
            .map_err(|e| map_db_err("role row", e))?,
    })
}

fn permission_from_row(row: &PgRow) -> Result<Permission> {
    let resource: String = row
        .try_get("resource")
        .map_err(|e| map_db_err("permission row", e))?;
    let action: String = row
        .try_get("action")
        .map_err(|e| map_db_err("permission row", e))?;
    let scope_mode: String = row
        .try_get("scope_mode")
        .map_err(|e| map_db_err("permission row", e))?;
    let entity_type_id: Option<uuid::Uuid> = row
        .try_get("entity_type_id")
        .map_err(|e| map_db_err("permission row", e))?;

    Ok(Permission {
        id: row.try_get("id").map_err(|e| map_db_err("permission row", e))?,
        role_id: row
            .try_get("role_id")
            .map_err(|e| map_db_err("permission row", e))?,
        resource: resource_from_str(&resource)?,
        action: action_from_str(&action)?,
        scope: scope_from_columns(&scope_mode, entity_type_id)?,
    })
}

fn assignment_from_row(row: &PgRow) -> Result<RoleAssignment> {
    let kind: String = row
        .try_get("principal_kind")
        .map_err(|e| map_db_err("assignment row", e))?;
    let principal_id: uuid::Uuid = row
        .try_get("principal_id")
        .map_err(|e| map_db_err("assignment row", e))?;

    Ok(RoleAssignment {
        id: row.try_get("id").map_err(|e| map_db_err("assignment row", e))?,
        principal: principal_from(&kind, principal_id)?,
        org_id: row
            .try_get("org_id")
            .map_err(|e| map_db_err("assignment row", e))?,
        workspace_id: row
            .try_get("workspace_id")
            .map_err(|e| map_db_err("assignment row", e))?,
        role_id: row
            .try_get("role_id")
            .map_err(|e| map_db_err("assignment row", e))?,
        granted_by_invitation: row
            .try_get("granted_by_invitation")
            .map_err(|e| map_db_err("assignment row", e))?,
        created_at: row
            .try_get("created_at")
            .map_err(|e| map_db_err("assignment row", e))?,
        deleted_at: row
            .try_get("deleted_at")
            .map_err(|e| map_db_err("assignment row", e))?,
    })
}

fn invitation_from_row(row: &PgRow) -> Result<Invitation> {
    Ok(Invitation {
        id: row.try_get("id").map_err(|e| map_db_err("invitation row", e))?,
        email: row
            .try_get("email")
            .map_err(|e| map_db_err("invitation row", e))?,
        org_id: row
            .try_get("org_id")
            .map_err(|e| map_db_err("invitation row", e))?,
        role_id: row
            .try_get("role_id")
            .map_err(|e| map_db_err("invitation row", e))?,
        invited_by: row
            .try_get("invited_by")
            .map_err(|e| map_db_err("invitation row", e))?,
        created_at: row
            .try_get("created_at")
            .map_err(|e| map_db_err("invitation row", e))?,
        expires_at: row
            .try_get("expires_at")
            .map_err(|e| map_db_err("invitation row", e))?,
        accepted_at: row
            .try_get("accepted_at")
            .map_err(|e| map_db_err("invitation row", e))?,
        expired_at: row
            .try_get("expired_at")
            .map_err(|e| map_db_err("invitation row", e))?,
        deleted_at: row
            .try_get("deleted_at")
            .map_err(|e| map_db_err("invitation row", e))?,
    })
}

/// Insert helpers shared by the trait methods and `apply_provision`
async fn insert_workspace_with<'e, E>(executor: E, workspace: &Workspace) -> Result<()>
where
    E: sqlx::Executor<'e, Database = sqlx::Postgres>,
{
    sqlx::query(
        "INSERT INTO workspaces (id, org_id, name, created_at, updated_at, deleted_at)
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(workspace.id)
    .bind(workspace.org_id)
    .bind(&workspace.name)
    .bind(workspace.created_at)
    .bind(workspace.updated_at)
    .bind(workspace.deleted_at)
    .execute(executor)
    .await
    .map_err(|e| map_db_err("insert workspace", e))?;
    Ok(())
}

async fn insert_membership_with<'e, E>(executor: E, membership: &OrgMembership) -> Result<()>
where
    E: sqlx::Executor<'e, Database = sqlx::Postgres>,
{
    sqlx::query(
        "INSERT INTO org_memberships (id, org_id, user_id, created_at, deleted_at)
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(membership.id)
    .bind(membership.org_id)
    .bind(membership.user_id)
    .bind(membership.created_at)
    .bind(membership.deleted_at)
    .execute(executor)
    .await
    .map_err(|e| map_db_err("insert membership", e))?;
    Ok(())
}

async fn insert_assignment_with<'e, E>(executor: E, assignment: &RoleAssignment) -> Result<()>
where
    E: sqlx::Executor<'e, Database = sqlx::Postgres>,
{
    let (kind, principal_id) = principal_kind(assignment.principal);
    sqlx::query(
        "INSERT INTO role_assignments
             (id, principal_kind, principal_id, org_id, workspace_id, role_id,
              granted_by_invitation, created_at, deleted_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
    )
    .bind(assignment.id)
    .bind(kind)
    .bind(principal_id)
    .bind(assignment.org_id)
    .bind(assignment.workspace_id)
    .bind(assignment.role_id)
    .bind(assignment.granted_by_invitation)
    .bind(assignment.created_at)
    .bind(assignment.deleted_at)
    .execute(executor)
    .await
    .map_err(|e| map_db_err("insert assignment", e))?;
    Ok(())
}

#[async_trait]
impl OrganizationStore for PostgresStore {
    async fn insert_organization(&self, org: Organization) -> Result<OrgId> {
        org.validate()?;
        sqlx::query(
            "INSERT INTO organizations (id, name, created_by, created_at, updated_at, deleted_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(org.id)
        .bind(&org.name)
        .bind(org.created_by)
        .bind(org.created_at)
        .bind(org.updated_at)
        .bind(org.deleted_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_db_err("insert organization", e))?;
        Ok(org.id)
    }

    async fn get_organization(&self, id: OrgId) -> Result<Option<Organization>> {
        let row = sqlx::query("SELECT * FROM organizations WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_db_err("get organization", e))?;
        row.as_ref().map(org_from_row).transpose()
    }

    async fn delete_organization(&self, id: OrgId) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_db_err("begin delete organization", e))?;
        let now = Utc::now();

        let updated = sqlx::query(
            "UPDATE organizations SET deleted_at = $2, updated_at = $2
             WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_db_err("delete organization", e))?;

        if updated.rows_affected() == 0 {
            // Either already deleted (fine) or never existed
            let exists = sqlx::query("SELECT 1 FROM organizations WHERE id = $1")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| map_db_err("delete organization", e))?;
            if exists.is_none() {
                return Err(CoreError::NotFound(format!("organization {id}")).into());
            }
            tx.commit()
                .await
                .map_err(|e| map_db_err("commit delete organization", e))?;
            return Ok(());
        }

        // Cascade: workspaces, teams, memberships, and assignments never
        // outlive their organization
        for table in ["workspaces", "teams", "org_memberships", "role_assignments"] {
            sqlx::query(&format!(
                "UPDATE {table} SET deleted_at = $2 WHERE org_id = $1 AND deleted_at IS NULL"
            ))
            .bind(id)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_db_err("cascade organization delete", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| map_db_err("commit delete organization", e))?;
        Ok(())
    }

    async fn insert_workspace(&self, workspace: Workspace) -> Result<WorkspaceId> {
        workspace.validate()?;
        self.require_live_org(workspace.org_id).await?;
        insert_workspace_with(&self.pool, &workspace).await?;
        Ok(workspace.id)
    }

    async fn get_workspace(&self, id: WorkspaceId) -> Result<Option<Workspace>> {
        let row = sqlx::query("SELECT * FROM workspaces WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_db_err("get workspace", e))?;
        row.as_ref().map(workspace_from_row).transpose()
    }

    async fn workspaces_in_org(&self, org_id: OrgId) -> Result<Vec<Workspace>> {
        let rows = sqlx::query(
            "SELECT * FROM workspaces
             WHERE org_id = $1 AND deleted_at IS NULL
             ORDER BY created_at",
        )
        .bind(org_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_db_err("list workspaces", e))?;
        rows.iter().map(workspace_from_row).collect()
    }
}

impl PostgresStore {
    async fn require_live_org(&self, org_id: OrgId) -> Result<()> {
        let live = sqlx::query("SELECT 1 FROM organizations WHERE id = $1 AND deleted_at IS NULL")
            .bind(org_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_db_err("check organization", e))?;
        if live.is_none() {
            return Err(
                CoreError::InvalidReference(format!("organization {org_id} does not exist")).into(),
            );
        }
        Ok(())
    }
}

#[async_trait]
impl RoleStore for PostgresStore {
    async fn insert_role(&self, role: Role) -> Result<RoleId> {
        role.validate()?;
        let org_id = match role.scope {
            RoleScope::Global => None,
            RoleScope::Organization(org_id) => Some(org_id),
        };
        sqlx::query(
            "INSERT INTO roles (id, name, description, org_id, created_at, updated_at, deleted_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(role.id)
        .bind(&role.name)
        .bind(&role.description)
        .bind(org_id)
        .bind(role.created_at)
        .bind(role.updated_at)
        .bind(role.deleted_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_db_err("insert role", e))?;
        Ok(role.id)
    }

    async fn get_role(&self, id: RoleId) -> Result<Option<Role>> {
        let row = sqlx::query("SELECT * FROM roles WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_db_err("get role", e))?;
        row.as_ref().map(role_from_row).transpose()
    }

    async fn find_role_by_name(&self, name: &str, org_id: Option<OrgId>) -> Result<Option<Role>> {
        // Organization-scoped roles shadow system-wide ones of the same name
        let row = match org_id {
            Some(org_id) => sqlx::query(
                "SELECT * FROM roles
                 WHERE lower(name) = lower($1)
                   AND deleted_at IS NULL
                   AND (org_id = $2 OR org_id IS NULL)
                 ORDER BY (org_id IS NULL)
                 LIMIT 1",
            )
            .bind(name)
            .bind(org_id)
            .fetch_optional(&self.pool)
            .await,
            None => sqlx::query(
                "SELECT * FROM roles
                 WHERE lower(name) = lower($1) AND deleted_at IS NULL AND org_id IS NULL
                 LIMIT 1",
            )
            .bind(name)
            .fetch_optional(&self.pool)
            .await,
        }
        .map_err(|e| map_db_err("find role by name", e))?;
        row.as_ref().map(role_from_row).transpose()
    }

    async fn delete_role(&self, id: RoleId) -> Result<()> {
        let updated = sqlx::query(
            "UPDATE roles SET deleted_at = $2, updated_at = $2
             WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| map_db_err("delete role", e))?;
        if updated.rows_affected() == 0 {
            let exists = sqlx::query("SELECT 1 FROM roles WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| map_db_err("delete role", e))?;
            if exists.is_none() {
                return Err(CoreError::NotFound(format!("role {id}")).into());
            }
        }
        Ok(())
    }

    async fn insert_permission(&self, permission: Permission) -> Result<PermissionId> {
        let live = sqlx::query("SELECT 1 FROM roles WHERE id = $1 AND deleted_at IS NULL")
            .bind(permission.role_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_db_err("check role", e))?;
        if live.is_none() {
            return Err(CoreError::InvalidReference(format!(
                "role {} does not exist",
                permission.role_id
            ))
            .into());
        }

        let (scope_mode, entity_type_id) = scope_to_columns(permission.scope);
        sqlx::query(
            "INSERT INTO permissions (id, role_id, resource, action, scope_mode, entity_type_id)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(permission.id)
        .bind(permission.role_id)
        .bind(resource_to_str(permission.resource))
        .bind(action_to_str(permission.action))
        .bind(scope_mode)
        .bind(entity_type_id)
        .execute(&self.pool)
        .await
        .map_err(|e| map_db_err("insert permission", e))?;
        Ok(permission.id)
    }

    async fn permissions_for_role(&self, role_id: RoleId) -> Result<Vec<Permission>> {
        let rows = sqlx::query("SELECT * FROM permissions WHERE role_id = $1")
            .bind(role_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_db_err("list permissions", e))?;
        rows.iter().map(permission_from_row).collect()
    }
}

#[async_trait]
impl AssignmentStore for PostgresStore {
    async fn upsert_assignment(&self, assignment: RoleAssignment) -> Result<AssignmentId> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_db_err("begin upsert assignment", e))?;

        let (kind, principal_id) = principal_kind(assignment.principal);
        let existing = sqlx::query(
            "SELECT id, deleted_at FROM role_assignments
             WHERE principal_kind = $1 AND principal_id = $2 AND org_id = $3
               AND workspace_id IS NOT DISTINCT FROM $4 AND role_id = $5
             FOR UPDATE",
        )
        .bind(kind)
        .bind(principal_id)
        .bind(assignment.org_id)
        .bind(assignment.workspace_id)
        .bind(assignment.role_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_db_err("find assignment", e))?;

        let id = match existing {
            Some(row) => {
                let id: AssignmentId = row
                    .try_get("id")
                    .map_err(|e| map_db_err("assignment row", e))?;
                let deleted_at: Option<DateTime<Utc>> = row
                    .try_get("deleted_at")
                    .map_err(|e| map_db_err("assignment row", e))?;
                if deleted_at.is_some() {
                    sqlx::query(
                        "UPDATE role_assignments
                         SET deleted_at = NULL, granted_by_invitation = $2
                         WHERE id = $1",
                    )
                    .bind(id)
                    .bind(assignment.granted_by_invitation)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| map_db_err("reinstate assignment", e))?;
                }
                id
            }
            None => {
                insert_assignment_with(&mut *tx, &assignment).await?;
                assignment.id
            }
        };

        tx.commit()
            .await
            .map_err(|e| map_db_err("commit upsert assignment", e))?;
        Ok(id)
    }

    async fn revoke_assignment(&self, id: AssignmentId) -> Result<()> {
        let updated = sqlx::query(
            "UPDATE role_assignments SET deleted_at = $2 WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| map_db_err("revoke assignment", e))?;
        if updated.rows_affected() == 0 {
            let exists = sqlx::query("SELECT 1 FROM role_assignments WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| map_db_err("revoke assignment", e))?;
            if exists.is_none() {
                return Err(CoreError::NotFound(format!("assignment {id}")).into());
            }
        }
        Ok(())
    }

    async fn assignments_for(
        &self,
        principals: &[PrincipalRef],
        org_id: OrgId,
    ) -> Result<Vec<RoleAssignment>> {
        let mut user_ids = Vec::new();
        let mut team_ids = Vec::new();
        for principal in principals {
            match principal {
                PrincipalRef::User(id) => user_ids.push(*id),
                PrincipalRef::Team(id) => team_ids.push(*id),
            }
        }

        let rows = sqlx::query(
            "SELECT * FROM role_assignments
             WHERE org_id = $1 AND deleted_at IS NULL
               AND ((principal_kind = 'user' AND principal_id = ANY($2))
                 OR (principal_kind = 'team' AND principal_id = ANY($3)))",
        )
        .bind(org_id)
        .bind(&user_ids)
        .bind(&team_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_db_err("list assignments", e))?;
        rows.iter().map(assignment_from_row).collect()
    }

    async fn revoke_assignments_from_invitation(
        &self,
        invitation_id: InvitationId,
    ) -> Result<u64> {
        let updated = sqlx::query(
            "UPDATE role_assignments SET deleted_at = $2
             WHERE granted_by_invitation = $1 AND deleted_at IS NULL",
        )
        .bind(invitation_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| map_db_err("revoke invitation assignments", e))?;
        Ok(updated.rows_affected())
    }
}

#[async_trait]
impl MembershipStore for PostgresStore {
    async fn is_member(&self, user_id: UserId, org_id: OrgId) -> Result<bool> {
        let row = sqlx::query(
            "SELECT 1 FROM org_memberships
             WHERE user_id = $1 AND org_id = $2 AND deleted_at IS NULL",
        )
        .bind(user_id)
        .bind(org_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_db_err("membership check", e))?;
        Ok(row.is_some())
    }

    async fn insert_membership(&self, membership: OrgMembership) -> Result<MembershipId> {
        self.require_live_org(membership.org_id).await?;
        insert_membership_with(&self.pool, &membership).await?;
        Ok(membership.id)
    }

    async fn memberships_for_user(&self, user_id: UserId) -> Result<Vec<OrgMembership>> {
        let rows = sqlx::query(
            "SELECT * FROM org_memberships
             WHERE user_id = $1 AND deleted_at IS NULL
             ORDER BY created_at",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_db_err("list memberships", e))?;
        rows.iter().map(membership_from_row).collect()
    }
}

#[async_trait]
impl TeamStore for PostgresStore {
    async fn insert_team(&self, team: Team) -> Result<TeamId> {
        team.validate()?;
        self.require_live_org(team.org_id).await?;
        sqlx::query(
            "INSERT INTO teams (id, org_id, name, created_at, updated_at, deleted_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(team.id)
        .bind(team.org_id)
        .bind(&team.name)
        .bind(team.created_at)
        .bind(team.updated_at)
        .bind(team.deleted_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_db_err("insert team", e))?;
        Ok(team.id)
    }

    async fn get_team(&self, id: TeamId) -> Result<Option<Team>> {
        let row = sqlx::query("SELECT * FROM teams WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_db_err("get team", e))?;
        row.as_ref().map(team_from_row).transpose()
    }

    async fn insert_team_member(&self, membership: TeamMembership) -> Result<()> {
        // Team membership is scoped to the team's organization
        let row = sqlx::query(
            "SELECT org_id FROM teams WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(membership.team_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_db_err("check team", e))?
        .ok_or_else(|| {
            CoreError::InvalidReference(format!("team {} does not exist", membership.team_id))
        })?;
        let org_id: OrgId = row
            .try_get("org_id")
            .map_err(|e| map_db_err("team row", e))?;
        if !self.is_member(membership.user_id, org_id).await? {
            return Err(CoreError::InvalidReference(format!(
                "user {} is not a member of organization {org_id}",
                membership.user_id
            ))
            .into());
        }

        sqlx::query(
            "INSERT INTO team_members (team_id, user_id, created_at)
             VALUES ($1, $2, $3)
             ON CONFLICT (team_id, user_id) DO NOTHING",
        )
        .bind(membership.team_id)
        .bind(membership.user_id)
        .bind(membership.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_db_err("insert team member", e))?;
        Ok(())
    }

    async fn teams_for_user(&self, user_id: UserId, org_id: OrgId) -> Result<Vec<TeamId>> {
        let rows = sqlx::query(
            "SELECT t.id FROM teams t
             JOIN team_members m ON m.team_id = t.id
             WHERE m.user_id = $1 AND t.org_id = $2 AND t.deleted_at IS NULL",
        )
        .bind(user_id)
        .bind(org_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_db_err("list teams", e))?;
        rows.iter()
            .map(|row| {
                row.try_get("id")
                    .map_err(|e| map_db_err("team row", e))
            })
            .collect()
    }
}

#[async_trait]
impl InvitationStore for PostgresStore {
    async fn insert_invitation(&self, invitation: Invitation) -> Result<InvitationId> {
        invitation.validate()?;
        sqlx::query(
            "INSERT INTO invitations
                 (id, email, org_id, role_id, invited_by, created_at, expires_at,
                  accepted_at, expired_at, deleted_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(invitation.id)
        .bind(&invitation.email)
        .bind(invitation.org_id)
        .bind(invitation.role_id)
        .bind(invitation.invited_by)
        .bind(invitation.created_at)
        .bind(invitation.expires_at)
        .bind(invitation.accepted_at)
        .bind(invitation.expired_at)
        .bind(invitation.deleted_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_db_err("insert invitation", e))?;
        Ok(invitation.id)
    }

    async fn get_invitation(&self, id: InvitationId) -> Result<Option<Invitation>> {
        let row = sqlx::query("SELECT * FROM invitations WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_db_err("get invitation", e))?;
        row.as_ref().map(invitation_from_row).transpose()
    }

    async fn latest_pending_for_email(
        &self,
        email: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Invitation>> {
        let row = sqlx::query(
            "SELECT * FROM invitations
             WHERE lower(email) = lower($1)
               AND deleted_at IS NULL
               AND accepted_at IS NULL
               AND expired_at IS NULL
               AND expires_at > $2
             ORDER BY created_at DESC
             LIMIT 1",
        )
        .bind(email)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_db_err("find pending invitation", e))?;
        row.as_ref().map(invitation_from_row).transpose()
    }

    async fn mark_accepted(&self, id: InvitationId, at: DateTime<Utc>) -> Result<()> {
        let updated = sqlx::query(
            "UPDATE invitations SET accepted_at = $2
             WHERE id = $1 AND deleted_at IS NULL AND accepted_at IS NULL
               AND expired_at IS NULL AND expires_at > $2",
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_db_err("accept invitation", e))?;
        if updated.rows_affected() == 0 {
            let invitation = self.get_invitation(id).await?;
            return match invitation {
                // Already accepted: idempotent success
                Some(invitation) if invitation.accepted_at.is_some() => Ok(()),
                Some(_) => Err(CoreError::ValidationFailed(format!(
                    "invitation {id} is no longer pending"
                ))
                .into()),
                None => Err(CoreError::NotFound(format!("invitation {id}")).into()),
            };
        }
        Ok(())
    }

    async fn mark_expired(&self, id: InvitationId, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "UPDATE invitations SET expired_at = $2
             WHERE id = $1 AND accepted_at IS NULL AND expired_at IS NULL",
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_db_err("expire invitation", e))?;
        Ok(())
    }

    async fn delete_invitation(&self, id: InvitationId) -> Result<()> {
        let updated = sqlx::query(
            "UPDATE invitations SET deleted_at = $2 WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| map_db_err("delete invitation", e))?;
        if updated.rows_affected() == 0 {
            let exists = sqlx::query("SELECT 1 FROM invitations WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| map_db_err("delete invitation", e))?;
            if exists.is_none() {
                return Err(CoreError::NotFound(format!("invitation {id}")).into());
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ProvisionStore for PostgresStore {
    async fn apply_provision(&self, plan: ProvisionPlan) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_db_err("begin provision", e))?;

        if let Some(org) = &plan.organization {
            org.validate()?;
            // Storage-level half of the idempotency guard: a personal
            // organization is only created for an account with no
            // membership anywhere
            let provisioned = sqlx::query(
                "SELECT 1 FROM org_memberships WHERE user_id = $1 AND deleted_at IS NULL LIMIT 1",
            )
            .bind(plan.membership.user_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_db_err("check provisioned", e))?;
            if provisioned.is_some() {
                return Err(CoreError::AlreadyExists(format!(
                    "principal {} already provisioned",
                    plan.membership.user_id
                ))
                .into());
            }

            sqlx::query(
                "INSERT INTO organizations
                     (id, name, created_by, created_at, updated_at, deleted_at)
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(org.id)
            .bind(&org.name)
            .bind(org.created_by)
            .bind(org.created_at)
            .bind(org.updated_at)
            .bind(org.deleted_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_db_err("insert organization", e))?;
        }

        plan.workspace.validate()?;
        insert_workspace_with(&mut *tx, &plan.workspace).await?;
        insert_membership_with(&mut *tx, &plan.membership).await?;
        for assignment in &plan.assignments {
            insert_assignment_with(&mut *tx, assignment).await?;
        }

        if let Some((invitation_id, accepted_at)) = plan.accept_invitation {
            let updated = sqlx::query(
                "UPDATE invitations SET accepted_at = $2
                 WHERE id = $1 AND deleted_at IS NULL AND accepted_at IS NULL
                   AND expired_at IS NULL AND expires_at > $2",
            )
            .bind(invitation_id)
            .bind(accepted_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_db_err("accept invitation", e))?;
            if updated.rows_affected() == 0 {
                // Dropping the transaction rolls every prior write back
                return Err(CoreError::ValidationFailed(format!(
                    "invitation {invitation_id} is no longer pending"
                ))
                .into());
            }
        }

        tx.commit().await.map_err(|e| map_db_err("commit provision", e))?;
        Ok(())
    }
}

//! Directory administration: user stores, tenants and provisioned users.

use anyhow::{Context, Result};
use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};

use bulkprov_core::db::Database;

use crate::style;

pub fn add_store(db: &Database, domain: &str) -> Result<()> {
    let inserted = db
        .insert_user_store(domain)
        .context("failed to register user store")?;
    if inserted {
        println!("{}", style::success(&format!("user store {} registered", domain.to_uppercase())));
    } else {
        println!("{}", style::warn(&format!("user store {} already exists", domain.to_uppercase())));
    }
    Ok(())
}

pub fn list_stores(db: &Database) -> Result<()> {
    let stores = db.list_user_stores().context("failed to list user stores")?;

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Domain", "Users", "Registered"]);
    for store in &stores {
        table.add_row(vec![
            Cell::new(&store.domain),
            Cell::new(store.user_count),
            Cell::new(&store.created_at[..10.min(store.created_at.len())]),
        ]);
    }

    println!("{}", table);
    Ok(())
}

pub fn add_tenant(db: &Database, domain: &str) -> Result<()> {
    let id = db.insert_tenant(domain).context("failed to register tenant")?;
    println!("{}", style::success(&format!("tenant {} has id {}", domain, id)));
    Ok(())
}

pub fn list_tenants(db: &Database) -> Result<()> {
    let tenants = db.list_tenants().context("failed to list tenants")?;

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["ID", "Domain", "Users", "Registered"]);
    for tenant in &tenants {
        table.add_row(vec![
            Cell::new(tenant.id),
            Cell::new(&tenant.domain),
            Cell::new(tenant.user_count),
            Cell::new(&tenant.created_at[..10.min(tenant.created_at.len())]),
        ]);
    }

    println!("{}", table);
    Ok(())
}

pub fn list_users(db: &Database, tenant: Option<&str>, limit: u32) -> Result<()> {
    let tenant_id = match tenant {
        Some(domain) => Some(
            db.get_tenant_id(domain)
                .context("failed to look up tenant")?
                .ok_or_else(|| anyhow::anyhow!("tenant '{}' not found", domain))?,
        ),
        None => None,
    };

    let users = db
        .list_users(tenant_id, limit)
        .context("failed to list users")?;

    if users.is_empty() {
        println!("{}", style::dim("No users found."));
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Username", "Store", "Tenant", "Roles", "Claims", "Created"]);
    for user in &users {
        let roles = if user.roles.is_empty() {
            "—".to_string()
        } else {
            user.roles.join(", ")
        };
        table.add_row(vec![
            Cell::new(&user.username),
            Cell::new(&user.store_domain),
            Cell::new(&user.tenant_domain),
            Cell::new(roles),
            Cell::new(user.claims.len()),
            Cell::new(&user.created_at[..19.min(user.created_at.len())]),
        ]);
    }

    println!("{}", table);
    println!();
    println!("{} user(s) shown", users.len());
    Ok(())
}

//! Plain-text rendering of console state for the interactive shell.

use crate::identity::{Identity, SessionState};
use crate::scope::{ContractPhase, DataContract, Scope, TenantListView};

const MAX_COL_WIDTH: usize = 48;

/// Tenant page as an ASCII table; the selected tenant is marked with `*`.
pub fn render_tenants(view: &TenantListView, selected: Option<i64>) -> String {
    let cols = ["", "id", "code", "name", "status", "updated"];
    let rows: Vec<Vec<String>> = view
        .tenants
        .iter()
        .map(|t| {
            vec![
                mark(selected == Some(t.id)),
                t.id.to_string(),
                t.code.clone(),
                t.name.clone(),
                t.lifecycle_status.to_string(),
                t.updated_at.map(|d| d.format("%Y-%m-%d %H:%M").to_string()).unwrap_or_default(),
            ]
        })
        .collect();
    let mut out = render_table(&cols, &rows);
    let mut summary = format!(
        "page {}/{} (size {}), {} tenants total",
        view.page + 1,
        view.total_pages.max(1),
        view.size,
        view.total_elements
    );
    if view.loading {
        summary.push_str(", loading");
    }
    out.push_str(&summary);
    if let Some(err) = &view.error {
        out.push_str(&format!("\nlast load failed: {} (showing previous listing)", err));
    }
    out
}

pub fn render_contracts(contracts: &[DataContract], phase: ContractPhase, selected: Option<i64>) -> String {
    match phase {
        ContractPhase::None => return "no tenant selected".to_string(),
        ContractPhase::Loading if contracts.is_empty() => return "loading data contracts...".to_string(),
        _ => {}
    }
    if contracts.is_empty() {
        return "tenant has no data contracts".to_string();
    }
    let cols = ["", "id", "name", "type", "root", "active", "priority"];
    let rows: Vec<Vec<String>> = contracts
        .iter()
        .map(|c| {
            vec![
                mark(selected == Some(c.id)),
                c.id.to_string(),
                c.name.clone(),
                c.contract_type.clone(),
                c.root_element.clone(),
                if c.is_active { "yes".into() } else { "no".into() },
                c.priority.to_string(),
            ]
        })
        .collect();
    let mut out = render_table(&cols, &rows);
    out.push_str(&format!("{} data contracts", contracts.len()));
    out
}

pub fn render_status(state: SessionState, identity: Option<&Identity>, scope: &Scope) -> String {
    let who = match identity {
        Some(id) if id.roles.is_empty() => id.subject_name.clone(),
        Some(id) => format!("{} [{}]", id.subject_name, id.roles.join(", ")),
        None => "-".to_string(),
    };
    let tenant = scope
        .tenant
        .as_ref()
        .map(|t| format!("{} ({}, id {})", t.name, t.code, t.id))
        .unwrap_or_else(|| "-".to_string());
    let contract = scope
        .data_contract
        .as_ref()
        .map(|c| format!("{} (id {})", c.name, c.id))
        .unwrap_or_else(|| "-".to_string());
    format!("session:  {}\nuser:     {}\ntenant:   {}\ncontract: {}", state, who, tenant, contract)
}

fn mark(selected: bool) -> String {
    if selected { "*".to_string() } else { String::new() }
}

fn render_table(cols: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = cols.iter().map(|c| display_len(c).min(MAX_COL_WIDTH)).collect();
    for r in rows {
        for (i, cell) in r.iter().enumerate().take(cols.len()) {
            widths[i] = widths[i].max(display_len(cell).min(MAX_COL_WIDTH));
        }
    }
    let header: Vec<String> = cols.iter().map(|c| c.to_string()).collect();
    let sep = build_separator(&widths);
    let mut out = String::new();
    out.push_str(&sep);
    out.push('\n');
    out.push_str(&build_row(&header, &widths));
    out.push('\n');
    out.push_str(&sep);
    out.push('\n');
    for r in rows {
        out.push_str(&build_row(r, &widths));
        out.push('\n');
    }
    out.push_str(&sep);
    out.push('\n');
    out
}

fn display_len(s: &str) -> usize { s.chars().count() }

fn build_separator(widths: &[usize]) -> String {
    let mut s = String::from("+");
    for w in widths {
        s.push_str(&"-".repeat(*w + 2));
        s.push('+');
    }
    s
}

fn build_row(cells: &[String], widths: &[usize]) -> String {
    let mut s = String::from("|");
    for (i, w) in widths.iter().enumerate() {
        let cell = cells.get(i).map(String::as_str).unwrap_or("");
        let text = truncate(cell, *w);
        let pad = " ".repeat(w.saturating_sub(display_len(&text)));
        s.push(' ');
        if is_numeric_like(cell) {
            s.push_str(&pad);
            s.push_str(&text);
        } else {
            s.push_str(&text);
            s.push_str(&pad);
        }
        s.push_str(" |");
    }
    s
}

fn truncate(s: &str, max: usize) -> String {
    if display_len(s) <= max {
        return s.to_string();
    }
    if max <= 1 {
        return "…".to_string();
    }
    s.chars().take(max - 1).collect::<String>() + "…"
}

fn is_numeric_like(s: &str) -> bool {
    let st = s.trim();
    !st.is_empty() && st.chars().all(|c| c.is_ascii_digit() || c == '-') && st.chars().any(|c| c.is_ascii_digit())
}

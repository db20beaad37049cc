use super::{tag_missing, CaseStore};
use crate::{
    error::{DeskError, DeskResult},
    model::{CustomerAccount, NewAccount},
    types::AccountId,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

const ACCOUNT_COLUMNS: &str = "id, account_number, customer_name, email, phone, address,
                               credit_limit, current_balance, created_at";

fn account_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CustomerAccount> {
    Ok(CustomerAccount {
        id: row.get(0)?,
        account_number: row.get(1)?,
        customer_name: row.get(2)?,
        email: row.get(3)?,
        phone: row.get(4)?,
        address: row.get(5)?,
        credit_limit: row.get(6)?,
        current_balance: row.get(7)?,
        created_at: row.get(8)?,
    })
}

pub(super) fn account_by_id(conn: &Connection, account_id: AccountId) -> DeskResult<CustomerAccount> {
    conn.query_row(
        &format!("SELECT {ACCOUNT_COLUMNS} FROM customer_account WHERE id = ?1"),
        params![account_id],
        account_row,
    )
    .map_err(|e| tag_missing(e.into(), "account", account_id))
}

impl CaseStore {
    // ── Customer accounts ─────────────────────────────────────────

    pub fn insert_account(&self, a: &NewAccount, at: DateTime<Utc>) -> DeskResult<CustomerAccount> {
        a.validate()?;
        if self.account_by_number(&a.account_number)?.is_some() {
            return Err(DeskError::Validation(format!(
                "account_number '{}' already exists",
                a.account_number
            )));
        }
        self.conn.execute(
            "INSERT INTO customer_account (
                account_number, customer_name, email, phone, address,
                credit_limit, current_balance, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                &a.account_number,
                &a.customer_name,
                a.email.as_deref(),
                a.phone.as_deref(),
                a.address.as_deref(),
                a.credit_limit,
                a.current_balance,
                at,
            ],
        )?;
        account_by_id(&self.conn, self.conn.last_insert_rowid())
    }

    pub fn account(&self, account_id: AccountId) -> DeskResult<CustomerAccount> {
        account_by_id(&self.conn, account_id)
    }

    pub fn account_by_number(&self, account_number: &str) -> DeskResult<Option<CustomerAccount>> {
        self.conn
            .query_row(
                &format!("SELECT {ACCOUNT_COLUMNS} FROM customer_account WHERE account_number = ?1"),
                params![account_number],
                account_row,
            )
            .optional()
            .map_err(Into::into)
    }

    /// Billing owns the balance; the desk only records what it is told.
    pub fn set_account_balance(&self, account_id: AccountId, balance: f64) -> DeskResult<()> {
        if !balance.is_finite() {
            return Err(DeskError::Validation("current_balance must be a finite number".into()));
        }
        let updated = self.conn.execute(
            "UPDATE customer_account SET current_balance = ?1 WHERE id = ?2",
            params![balance, account_id],
        )?;
        if updated == 0 {
            return Err(DeskError::not_found("account", account_id));
        }
        Ok(())
    }

    pub fn account_count(&self) -> DeskResult<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM customer_account", [], |r| r.get(0))?)
    }
}

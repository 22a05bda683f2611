//! `SQLite`-backed ledger
//!
//! Amounts are stored as integer cents. Bonus and transferred status are
//! explicit flags; comments are free text only.

// SQLite returns i64 for row ids and amounts; timestamps are u64 nanoseconds.
#![allow(clippy::cast_sign_loss, clippy::cast_possible_wrap)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use carotte_common::{round_to_cents, StudentId};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row, Transaction};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::{debug, info};

use crate::client::{AccountSummary, BonusBatch, EntryId, EntryKind, LedgerClient, LedgerEntry};
use crate::error::LedgerError;
use crate::legacy::LegacyEntry;

/// Schema SQL embedded at compile time.
const SCHEMA_SQL: &str = include_str!("schema.sql");

const ENTRY_COLUMNS: &str =
    "id, student_id, amount_cents, kind, comment, bonus, transferred, created_at_ns";

const PENDING_BONUS_PREDICATE: &str =
    "student_id = ?1 AND kind = 'CREDIT' AND bonus = 1 AND transferred = 0";

/// The student card ledger backed by `SQLite`.
pub struct SqliteLedger {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl SqliteLedger {
    /// Opens or creates a ledger at the specified path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let path = path.as_ref();
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        let mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        debug!(path = %path.display(), journal_mode = %mode, "Opened ledger");

        Self::initialize_connection(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: Some(path.to_path_buf()),
        })
    }

    /// Creates an in-memory ledger for testing and demo mode.
    pub fn in_memory() -> Result<Self, LedgerError> {
        let conn = Connection::open_in_memory()?;
        Self::initialize_connection(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: None,
        })
    }

    fn initialize_connection(conn: &Connection) -> Result<(), LedgerError> {
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(())
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a student with an account at 0.00.
    pub fn register_student(
        &self,
        student: &StudentId,
        last_name: &str,
        first_name: &str,
    ) -> Result<(), LedgerError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        if student_exists(&tx, student)? {
            return Err(LedgerError::DuplicateStudent(student.clone()));
        }
        tx.execute(
            "INSERT INTO students (student_id, last_name, first_name, created_at_ns)
             VALUES (?1, ?2, ?3, ?4)",
            params![student.as_str(), last_name.trim(), first_name.trim(), now_ns() as i64],
        )?;
        tx.execute(
            "INSERT INTO accounts (student_id, balance_cents) VALUES (?1, 0)",
            params![student.as_str()],
        )?;
        tx.commit()?;

        info!(student = %student, "Student registered");
        Ok(())
    }

    /// Credit a bonus row for later transfer to the card.
    pub fn award_bonus(
        &self,
        student: &StudentId,
        amount: Decimal,
        comment: &str,
    ) -> Result<EntryId, LedgerError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let id = append_entry(
            &tx,
            student,
            EntryKind::Credit,
            to_cents(amount)?,
            comment,
            true,
            false,
            now_ns(),
        )?;
        tx.commit()?;

        info!(student = %student, %amount, entry = id, "Bonus awarded");
        Ok(id)
    }

    /// Every student with the ledger-side balance, by student number.
    pub fn list_accounts(&self) -> Result<Vec<AccountSummary>, LedgerError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT s.student_id, s.last_name, s.first_name, a.balance_cents
             FROM students s
             JOIN accounts a ON a.student_id = s.student_id
             ORDER BY s.student_id",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?;

        let mut accounts = Vec::new();
        for row in rows {
            let (id, last_name, first_name, cents) = row?;
            accounts.push(AccountSummary {
                student_id: parse_student(&id, 0)?,
                last_name,
                first_name,
                balance: from_cents(cents),
            });
        }
        Ok(accounts)
    }

    /// Ledger-side balance of one account.
    pub fn balance(&self, student: &StudentId) -> Result<Decimal, LedgerError> {
        let conn = self.conn();
        let cents: Option<i64> = conn
            .query_row(
                "SELECT balance_cents FROM accounts WHERE student_id = ?1",
                params![student.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        cents
            .map(from_cents)
            .ok_or_else(|| LedgerError::UnknownStudent(student.clone()))
    }

    /// All rows of one student, oldest first.
    pub fn entries(&self, student: &StudentId) -> Result<Vec<LedgerEntry>, LedgerError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {ENTRY_COLUMNS} FROM transactions WHERE student_id = ?1 ORDER BY id ASC"
        ))?;
        let rows = stmt.query_map(params![student.as_str()], RawEntry::from_row)?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?.into_entry()?);
        }
        Ok(entries)
    }

    /// Import legacy rows in one transaction, deriving the flags from
    /// their comments. Students must already exist.
    pub fn import_legacy(&self, rows: &[LegacyEntry]) -> Result<Vec<EntryId>, LedgerError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let mut ids = Vec::with_capacity(rows.len());
        for row in rows {
            let flags = row.flags();
            ids.push(append_entry(
                &tx,
                &row.student_id,
                row.kind,
                to_cents(row.amount)?,
                &row.comment,
                flags.bonus,
                flags.transferred,
                row.timestamp_ns,
            )?);
        }
        tx.commit()?;

        info!(count = ids.len(), "Legacy rows imported");
        Ok(ids)
    }

    fn append(
        &self,
        student: &StudentId,
        kind: EntryKind,
        amount: Decimal,
        comment: &str,
    ) -> Result<EntryId, LedgerError> {
        let cents = to_cents(amount)?;
        let bonus = kind == EntryKind::Credit && crate::legacy::classify_comment(comment).bonus;

        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let id = append_entry(&tx, student, kind, cents, comment, bonus, false, now_ns())?;
        tx.commit()?;

        debug!(student = %student, kind = kind.as_str(), %amount, entry = id, "Ledger entry appended");
        Ok(id)
    }
}

impl LedgerClient for SqliteLedger {
    fn student_exists(&self, student: &StudentId) -> Result<bool, LedgerError> {
        let conn = self.conn();
        student_exists(&conn, student)
    }

    fn credit_ledger(
        &self,
        student: &StudentId,
        amount: Decimal,
        comment: &str,
    ) -> Result<EntryId, LedgerError> {
        self.append(student, EntryKind::Credit, amount, comment)
    }

    fn record_debit(
        &self,
        student: &StudentId,
        amount: Decimal,
        comment: &str,
    ) -> Result<EntryId, LedgerError> {
        self.append(student, EntryKind::Debit, amount, comment)
    }

    fn pending_bonus(&self, student: &StudentId) -> Result<BonusBatch, LedgerError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT id, amount_cents FROM transactions WHERE {PENDING_BONUS_PREDICATE} ORDER BY id"
        ))?;
        let rows = stmt.query_map(params![student.as_str()], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut entry_ids = Vec::new();
        let mut cents: i64 = 0;
        for row in rows {
            let (id, amount) = row?;
            entry_ids.push(id);
            cents = cents
                .checked_add(amount)
                .ok_or_else(|| LedgerError::Corrupt {
                    id,
                    details: "bonus total overflows".to_string(),
                })?;
        }

        Ok(BonusBatch {
            student_id: student.clone(),
            entry_ids,
            total: from_cents(cents),
        })
    }

    fn mark_bonus_transferred(&self, student: &StudentId) -> Result<usize, LedgerError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let count = tx.execute(
            &format!("UPDATE transactions SET transferred = 1 WHERE {PENDING_BONUS_PREDICATE}"),
            params![student.as_str()],
        )?;
        tx.commit()?;

        debug!(student = %student, count, "Bonus rows marked transferred");
        Ok(count)
    }

    fn mark_bonus_batch_transferred(&self, batch: &BonusBatch) -> Result<usize, LedgerError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let mut count = 0;
        {
            let mut stmt = tx.prepare(&format!(
                "UPDATE transactions SET transferred = 1 WHERE id = ?2 AND {PENDING_BONUS_PREDICATE}"
            ))?;
            for id in &batch.entry_ids {
                count += stmt.execute(params![batch.student_id.as_str(), id])?;
            }
        }
        tx.commit()?;

        debug!(student = %batch.student_id, count, requested = batch.entry_ids.len(), "Bonus batch marked transferred");
        Ok(count)
    }
}

struct RawEntry {
    id: i64,
    student_id: String,
    amount_cents: i64,
    kind: String,
    comment: String,
    bonus: bool,
    transferred: bool,
    created_at_ns: i64,
}

impl RawEntry {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            student_id: row.get(1)?,
            amount_cents: row.get(2)?,
            kind: row.get(3)?,
            comment: row.get(4)?,
            bonus: row.get(5)?,
            transferred: row.get(6)?,
            created_at_ns: row.get(7)?,
        })
    }

    fn into_entry(self) -> Result<LedgerEntry, LedgerError> {
        let kind = EntryKind::parse(&self.kind).ok_or_else(|| LedgerError::Corrupt {
            id: self.id,
            details: format!("unknown kind {:?}", self.kind),
        })?;
        Ok(LedgerEntry {
            id: self.id,
            student_id: parse_student(&self.student_id, self.id)?,
            amount: from_cents(self.amount_cents),
            kind,
            comment: self.comment,
            bonus: self.bonus,
            transferred: self.transferred,
            timestamp_ns: self.created_at_ns as u64,
        })
    }
}

#[allow(clippy::too_many_arguments)]
fn append_entry(
    tx: &Transaction<'_>,
    student: &StudentId,
    kind: EntryKind,
    cents: i64,
    comment: &str,
    bonus: bool,
    transferred: bool,
    timestamp_ns: u64,
) -> Result<EntryId, LedgerError> {
    let delta = match kind {
        EntryKind::Credit => cents,
        EntryKind::Debit => -cents,
    };
    let updated = tx.execute(
        "UPDATE accounts SET balance_cents = balance_cents + ?2 WHERE student_id = ?1",
        params![student.as_str(), delta],
    )?;
    if updated == 0 {
        return Err(LedgerError::UnknownStudent(student.clone()));
    }

    tx.execute(
        "INSERT INTO transactions (student_id, amount_cents, kind, comment, bonus, transferred, created_at_ns)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            student.as_str(),
            cents,
            kind.as_str(),
            comment,
            bonus,
            transferred,
            timestamp_ns as i64,
        ],
    )?;
    Ok(tx.last_insert_rowid())
}

fn student_exists(conn: &Connection, student: &StudentId) -> Result<bool, LedgerError> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM students WHERE student_id = ?1",
            params![student.as_str()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

fn parse_student(raw: &str, row_id: i64) -> Result<StudentId, LedgerError> {
    StudentId::parse(raw).map_err(|e| LedgerError::Corrupt {
        id: row_id,
        details: e.to_string(),
    })
}

/// Positive amount to cents, rounding half away from zero.
fn to_cents(amount: Decimal) -> Result<i64, LedgerError> {
    let cents = round_to_cents(amount);
    if cents <= Decimal::ZERO {
        return Err(LedgerError::InvalidAmount(amount));
    }
    cents.to_i64().ok_or(LedgerError::AmountOutOfRange(amount))
}

fn from_cents(cents: i64) -> Decimal {
    Decimal::new(cents, 2)
}

fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn ledger_with_student(id: &str) -> (SqliteLedger, StudentId) {
        let ledger = SqliteLedger::in_memory().unwrap();
        let student = StudentId::parse(id).unwrap();
        ledger.register_student(&student, "Dupont", "Léa").unwrap();
        (ledger, student)
    }

    #[test]
    fn test_register_creates_empty_account() {
        let (ledger, student) = ledger_with_student("42");
        assert_eq!(ledger.balance(&student).unwrap(), dec!(0.00));
        assert!(ledger.student_exists(&student).unwrap());
        assert!(matches!(
            ledger.register_student(&student, "X", "Y"),
            Err(LedgerError::DuplicateStudent(_))
        ));
    }

    #[test]
    fn test_credit_and_debit_move_balance() {
        let (ledger, student) = ledger_with_student("42");
        ledger.credit_ledger(&student, dec!(5.00), "Recharge CB Berlicum").unwrap();
        ledger.record_debit(&student, dec!(0.20), "LunarWhite: Café").unwrap();

        assert_eq!(ledger.balance(&student).unwrap(), dec!(4.80));
        let entries = ledger.entries(&student).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].kind, EntryKind::Credit);
        assert!(!entries[0].bonus);
        assert_eq!(entries[1].amount, dec!(0.20));
        assert_eq!(entries[1].comment, "LunarWhite: Café");
    }

    #[test]
    fn test_unknown_student_is_rejected() {
        let ledger = SqliteLedger::in_memory().unwrap();
        let ghost = StudentId::parse("99").unwrap();
        assert!(matches!(
            ledger.credit_ledger(&ghost, dec!(1), "x"),
            Err(LedgerError::UnknownStudent(_))
        ));
        assert!(ledger.entries(&ghost).unwrap().is_empty());
    }

    #[test]
    fn test_non_positive_amounts_are_rejected() {
        let (ledger, student) = ledger_with_student("42");
        assert!(matches!(
            ledger.award_bonus(&student, dec!(0), "Bonus"),
            Err(LedgerError::InvalidAmount(_))
        ));
        assert!(matches!(
            ledger.record_debit(&student, dec!(-1), "x"),
            Err(LedgerError::InvalidAmount(_))
        ));
    }

    #[test]
    fn test_bonus_comment_on_credit_sets_flag() {
        let (ledger, student) = ledger_with_student("42");
        ledger.credit_ledger(&student, dec!(2.00), "Bonus inscription").unwrap();
        assert_eq!(ledger.bonus_total(&student).unwrap(), dec!(2.00));
    }

    #[test]
    fn test_list_accounts_sorted() {
        let ledger = SqliteLedger::in_memory().unwrap();
        for (id, name) in [("30", "Martin"), ("10", "Bernard")] {
            let student = StudentId::parse(id).unwrap();
            ledger.register_student(&student, name, "Alex").unwrap();
        }
        let accounts = ledger.list_accounts().unwrap();
        assert_eq!(accounts[0].student_id.as_str(), "00000010");
        assert_eq!(accounts[1].last_name, "Martin");
    }

    #[test]
    fn test_to_cents_rounding() {
        assert_eq!(to_cents(dec!(3.505)).unwrap(), 351);
        assert_eq!(to_cents(dec!(1000000)).unwrap(), 100_000_000);
    }

    #[test]
    fn test_to_cents_agrees_with_card_conversion() {
        for amount in [dec!(0.005), dec!(1.235), dec!(12.344), dec!(655.35)] {
            let card = i64::from(carotte_common::to_minor_units(amount).unwrap());
            assert_eq!(to_cents(amount).unwrap(), card);
        }
        assert!(matches!(to_cents(dec!(0.004)), Err(LedgerError::InvalidAmount(_))));
    }
}

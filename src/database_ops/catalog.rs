//! Persisted promotion records and the insert-once persister.
use std::collections::HashSet;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::Row;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::db::Db;
use crate::steam::promotion::FullPromotion;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogRecord {
    pub title: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub url: String,
    pub image_url: Option<String>,
    pub fingerprint: String,
}

fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for b in digest {
        use std::fmt::Write;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

/// Dedup key for a promotion. Field order is fixed: title, url, start, end, each
/// newline-terminated except the last, dates as RFC 3339 UTC seconds. Changing it
/// orphans every fingerprint already stored.
pub fn record_fingerprint(title: &str, url: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> String {
    let material = format!(
        "{}\n{}\n{}\n{}",
        title,
        url,
        start.to_rfc3339_opts(SecondsFormat::Secs, true),
        end.to_rfc3339_opts(SecondsFormat::Secs, true)
    );
    sha256_hex(&material)
}

impl CatalogRecord {
    pub fn new(
        title: impl Into<String>,
        url: impl Into<String>,
        start_date: DateTime<Utc>,
        end_date: DateTime<Utc>,
        image_url: Option<String>,
    ) -> Self {
        let title = title.into();
        let url = url.into();
        let fingerprint = record_fingerprint(&title, &url, start_date, end_date);
        Self {
            title,
            start_date,
            end_date,
            url,
            image_url,
            fingerprint,
        }
    }

    pub fn compute_fingerprint(&self) -> String {
        record_fingerprint(&self.title, &self.url, self.start_date, self.end_date)
    }
}

impl From<&FullPromotion> for CatalogRecord {
    fn from(p: &FullPromotion) -> Self {
        CatalogRecord::new(
            p.name.clone(),
            p.store_url(),
            p.start_time,
            p.expiry_time,
            p.image_url.clone(),
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreSummary {
    pub inserted: usize,
    pub duplicates: usize,
    /// False when the batch was abandoned before commit; nothing was written.
    pub committed: bool,
}

#[derive(Clone)]
pub struct DedupPersister {
    db: Db,
}

impl DedupPersister {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Inserts every record whose fingerprint is not stored yet.
    ///
    /// The whole batch runs in one transaction and is committed once at the end;
    /// cancellation before that point rolls everything back.
    pub async fn store(&self, records: &[CatalogRecord], shutdown: &CancellationToken) -> Result<StoreSummary> {
        let mut summary = StoreSummary::default();
        let mut tx = self.db.pool.begin().await.context("begin catalog batch")?;
        let mut batch_seen: HashSet<String> = HashSet::with_capacity(records.len());
        let now = Utc::now().timestamp();

        for record in records {
            if shutdown.is_cancelled() {
                tx.rollback().await.context("rollback catalog batch")?;
                info!("catalog batch abandoned before commit");
                return Ok(StoreSummary {
                    committed: false,
                    ..summary
                });
            }

            let fingerprint = record.compute_fingerprint();
            if !batch_seen.insert(fingerprint.clone()) {
                summary.duplicates += 1;
                continue;
            }

            let exists: i64 =
                sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM catalog_records WHERE fingerprint = ?)")
                    .bind(&fingerprint)
                    .fetch_one(&mut *tx)
                    .await
                    .context("fingerprint lookup")?;
            if exists != 0 {
                debug!(fingerprint = %fingerprint, title = %record.title, "record already stored");
                summary.duplicates += 1;
                continue;
            }

            let res = sqlx::query(
                "INSERT INTO catalog_records (title, start_date, end_date, url, image_url, fingerprint, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(fingerprint) DO NOTHING",
            )
            .bind(&record.title)
            .bind(record.start_date.timestamp())
            .bind(record.end_date.timestamp())
            .bind(&record.url)
            .bind(record.image_url.as_deref())
            .bind(&fingerprint)
            .bind(now)
            .execute(&mut *tx)
            .await
            .context("insert catalog record")?;

            if res.rows_affected() == 1 {
                summary.inserted += 1;
            } else {
                summary.duplicates += 1;
            }
        }

        tx.commit().await.context("commit catalog batch")?;
        summary.committed = true;
        info!(
            inserted = summary.inserted,
            duplicates = summary.duplicates,
            "catalog batch committed"
        );
        Ok(summary)
    }
}

fn ts(raw: i64, column: &str) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(raw, 0).ok_or_else(|| anyhow!("{column} out of range: {raw}"))
}

/// Records whose promotion window contains `now`.
pub async fn active_records(db: &Db, now: DateTime<Utc>) -> Result<Vec<CatalogRecord>> {
    let rows = sqlx::query(
        "SELECT title, start_date, end_date, url, image_url, fingerprint
         FROM catalog_records
         WHERE start_date <= ? AND end_date >= ?
         ORDER BY end_date ASC, id ASC",
    )
    .bind(now.timestamp())
    .bind(now.timestamp())
    .fetch_all(&db.pool)
    .await
    .context("query active records")?;

    rows.into_iter()
        .map(|row| -> Result<CatalogRecord> {
            Ok(CatalogRecord {
                title: row.try_get("title")?,
                start_date: ts(row.try_get("start_date")?, "start_date")?,
                end_date: ts(row.try_get("end_date")?, "end_date")?,
                url: row.try_get("url")?,
                image_url: row.try_get("image_url")?,
                fingerprint: row.try_get("fingerprint")?,
            })
        })
        .collect()
}

pub async fn record_count(db: &Db) -> Result<i64> {
    let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM catalog_records")
        .fetch_one(&db.pool)
        .await?;
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(secs, 0).unwrap()
    }

    fn record(title: &str, start: i64, end: i64) -> CatalogRecord {
        CatalogRecord::new(
            title,
            "https://store.steampowered.com/app/100",
            at(start),
            at(end),
            Some("https://cdn.cloudflare.steamstatic.com/steam/apps/100/header.jpg".into()),
        )
    }

    #[test]
    fn fingerprint_is_stable_and_field_sensitive() {
        let a = record("Game", 1_700_000_000, 1_700_003_600);
        assert_eq!(a.fingerprint, a.compute_fingerprint());
        assert_eq!(a.fingerprint.len(), 64);
        assert_eq!(
            a.fingerprint,
            record_fingerprint(
                "Game",
                "https://store.steampowered.com/app/100",
                at(1_700_000_000),
                at(1_700_003_600)
            )
        );
        assert_ne!(a.fingerprint, record("Game 2", 1_700_000_000, 1_700_003_600).fingerprint);
        assert_ne!(a.fingerprint, record("Game", 1_700_000_001, 1_700_003_600).fingerprint);
        // image is not part of the identity
        let mut other_image = a.clone();
        other_image.image_url = None;
        assert_eq!(a.fingerprint, other_image.compute_fingerprint());
    }

    #[tokio::test]
    async fn storing_same_record_twice_keeps_one_row() {
        let db = Db::in_memory().await;
        let persister = DedupPersister::new(db.clone());
        let ct = CancellationToken::new();
        let r = record("Game", 1_700_000_000, 1_700_003_600);

        let first = persister.store(&[r.clone()], &ct).await.unwrap();
        assert_eq!(first.inserted, 1);
        let second = persister.store(&[r.clone()], &ct).await.unwrap();
        assert_eq!(second.inserted, 0);
        assert_eq!(second.duplicates, 1);
        assert_eq!(record_count(&db).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn duplicates_within_one_batch_are_collapsed() {
        let db = Db::in_memory().await;
        let persister = DedupPersister::new(db.clone());
        let r = record("Game", 1_700_000_000, 1_700_003_600);
        let other = record("Other", 1_700_000_000, 1_700_003_600);
        let summary = persister
            .store(&[r.clone(), other, r], &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.inserted, 2);
        assert_eq!(summary.duplicates, 1);
        assert!(summary.committed);
        assert_eq!(record_count(&db).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn cancelled_batch_writes_nothing() {
        let db = Db::in_memory().await;
        let persister = DedupPersister::new(db.clone());
        let ct = CancellationToken::new();
        ct.cancel();
        let summary = persister
            .store(&[record("Game", 1, 2)], &ct)
            .await
            .unwrap();
        assert!(!summary.committed);
        assert_eq!(record_count(&db).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn active_records_filters_by_window() {
        let db = Db::in_memory().await;
        let persister = DedupPersister::new(db.clone());
        persister
            .store(
                &[
                    record("Past", 100, 200),
                    record("Current", 900, 2_000),
                    record("Future", 5_000, 6_000),
                ],
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        let active = active_records(&db, at(1_000)).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].title, "Current");
        assert_eq!(active[0].start_date, at(900));
        assert_eq!(active[0].fingerprint, active[0].compute_fingerprint());
    }

    #[test]
    fn record_from_full_promotion_uses_store_url() {
        let promo = FullPromotion {
            app_id: 100,
            start_time: at(1_700_000_000),
            expiry_time: at(1_700_003_600),
            name: "Game".into(),
            image_url: None,
        };
        let r = CatalogRecord::from(&promo);
        assert_eq!(r.url, "https://store.steampowered.com/app/100");
        assert_eq!(r.end_date, at(1_700_003_600));
        assert_eq!(r.image_url, None);
    }
}

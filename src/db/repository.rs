use std::collections::HashMap;

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, Params, Row, ToSql, TransactionBehavior};

use crate::error::{AppError, Result, ValidationError};
use crate::models::{
    Article, ArticleId, AttachOutcome, Group, GroupId, NewArticle, NewPreview, PreviewMetadata,
};
use crate::validator::validate_url;

use super::Store;

const ARTICLE_SELECT: &str = r#"SELECT a.id, a.url, a.created_at,
                                      p.id, p.title, p.image_url, p.fetched_at
                               FROM articles a
                               LEFT JOIN previews p ON p.article_id = a.id"#;

const ARTICLE_ORDER: &str = "ORDER BY a.created_at DESC, a.rowid DESC";

// Keeps `IN (...)` lists well under SQLite's bound-parameter limit.
const MAX_IN_PARAMS: usize = 500;

/// The only read/write path to stored articles, groups and previews.
///
/// Relationship cleanup (preview cascade, membership nullify) happens here in
/// explicit transactions rather than through declarative delete rules.
#[derive(Clone)]
pub struct Repository {
    store: Store,
}

impl Repository {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    // Article operations

    /// Lists articles newest first, optionally restricted to one group's members.
    pub async fn list_articles(&self, group: Option<GroupId>) -> Result<Vec<Article>> {
        let articles = self
            .store
            .connection()
            .call(move |conn| {
                let articles = match group {
                    Some(group_id) => select_articles(
                        conn,
                        "WHERE EXISTS (
                            SELECT 1 FROM group_members m
                            WHERE m.article_id = a.id AND m.group_id = ?1
                         )",
                        params![group_id],
                    )?,
                    None => select_articles(conn, "", params![])?,
                };
                Ok(articles)
            })
            .await?;
        Ok(articles)
    }

    pub async fn get_article(&self, id: &str) -> Result<Option<Article>> {
        let id = id.to_string();
        let article = self
            .store
            .connection()
            .call(move |conn| {
                let mut found = select_articles(conn, "WHERE a.id = ?1", params![id])?;
                Ok(found.pop())
            })
            .await?;
        Ok(article)
    }

    /// Validates `url` and stores it as a new article with a fresh id and timestamp.
    pub async fn add_article(&self, url: &str) -> Result<Article> {
        self.insert_article(NewArticle::new(url.trim())).await
    }

    pub async fn insert_article(&self, article: NewArticle) -> Result<Article> {
        validate_url(&article.url)?;

        let created_at = article.created_at.trunc_subsecs(6);
        let stored = self
            .store
            .connection()
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO articles (id, url, created_at) VALUES (?1, ?2, ?3)",
                    params![article.id, article.url, format_timestamp(&created_at)],
                )?;
                Ok(Article {
                    id: article.id,
                    url: article.url,
                    created_at,
                    group_ids: Vec::new(),
                    preview: None,
                })
            })
            .await?;

        tracing::debug!("Added article {} ({})", stored.id, stored.url);
        Ok(stored)
    }

    /// Deletes an article together with its preview and group memberships.
    pub async fn delete_article(&self, id: &str) -> Result<()> {
        let article_id = id.to_string();
        let deleted = self
            .store
            .connection()
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                tx.execute("DELETE FROM previews WHERE article_id = ?1", params![article_id])?;
                tx.execute(
                    "DELETE FROM fetch_failures WHERE article_id = ?1",
                    params![article_id],
                )?;
                tx.execute(
                    "DELETE FROM group_members WHERE article_id = ?1",
                    params![article_id],
                )?;
                let changed = tx.execute("DELETE FROM articles WHERE id = ?1", params![article_id])?;
                if changed == 0 {
                    return Ok(false);
                }
                tx.commit()?;
                Ok(true)
            })
            .await?;

        if !deleted {
            return Err(AppError::not_found("article", id));
        }
        tracing::debug!("Deleted article {}", id);
        Ok(())
    }

    // Group operations

    /// Lists groups by name, case-insensitively.
    pub async fn list_groups(&self) -> Result<Vec<Group>> {
        let groups = self
            .store
            .connection()
            .call(|conn| Ok(select_groups(conn, "", params![])?))
            .await?;
        Ok(groups)
    }

    pub async fn get_group(&self, id: GroupId) -> Result<Option<Group>> {
        let group = self
            .store
            .connection()
            .call(move |conn| {
                let mut found = select_groups(conn, "WHERE g.id = ?1", params![id])?;
                Ok(found.pop())
            })
            .await?;
        Ok(group)
    }

    pub async fn add_group(&self, name: &str) -> Result<Group> {
        let name = name.trim().to_string();
        if name.is_empty() {
            return Err(ValidationError::EmptyGroupName.into());
        }

        let group = self
            .store
            .connection()
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO article_groups (name, created_at) VALUES (?1, ?2)",
                    params![name, format_timestamp(&Utc::now())],
                )?;
                Ok(Group {
                    id: conn.last_insert_rowid(),
                    name,
                    article_ids: Vec::new(),
                })
            })
            .await?;

        tracing::debug!("Added group {} ({})", group.id, group.name);
        Ok(group)
    }

    /// Removes the group from every member article, then the group itself.
    pub async fn delete_group(&self, id: GroupId) -> Result<()> {
        let deleted = self
            .store
            .connection()
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                tx.execute("DELETE FROM group_members WHERE group_id = ?1", params![id])?;
                let changed = tx.execute("DELETE FROM article_groups WHERE id = ?1", params![id])?;
                if changed == 0 {
                    return Ok(false);
                }
                tx.commit()?;
                Ok(true)
            })
            .await?;

        if !deleted {
            return Err(AppError::not_found("group", id));
        }
        tracing::debug!("Deleted group {}", id);
        Ok(())
    }

    /// Adds the article to the group. Assigning twice is a no-op.
    pub async fn assign_group(&self, article_id: &str, group_id: GroupId) -> Result<()> {
        let id = article_id.to_string();
        let missing = self
            .store
            .connection()
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                if !row_exists(&tx, "SELECT EXISTS(SELECT 1 FROM articles WHERE id = ?1)", params![id])? {
                    return Ok(Some("article"));
                }
                if !row_exists(
                    &tx,
                    "SELECT EXISTS(SELECT 1 FROM article_groups WHERE id = ?1)",
                    params![group_id],
                )? {
                    return Ok(Some("group"));
                }
                tx.execute(
                    "INSERT OR IGNORE INTO group_members (article_id, group_id, added_at) VALUES (?1, ?2, ?3)",
                    params![id, group_id, format_timestamp(&Utc::now())],
                )?;
                tx.commit()?;
                Ok(None)
            })
            .await?;

        match missing {
            Some("article") => Err(AppError::not_found("article", article_id)),
            Some(entity) => Err(AppError::not_found(entity, group_id)),
            None => {
                tracing::debug!("Assigned article {} to group {}", article_id, group_id);
                Ok(())
            }
        }
    }

    pub async fn unassign_group(&self, article_id: &str, group_id: GroupId) -> Result<()> {
        let id = article_id.to_string();
        self.store
            .connection()
            .call(move |conn| {
                conn.execute(
                    "DELETE FROM group_members WHERE article_id = ?1 AND group_id = ?2",
                    params![id, group_id],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    // Preview operations

    /// Articles without a preview whose failed fetch count is below `max_attempts`,
    /// in listing order.
    pub async fn articles_missing_preview(&self, max_attempts: u32) -> Result<Vec<Article>> {
        let articles = self
            .store
            .connection()
            .call(move |conn| {
                Ok(select_articles(
                    conn,
                    "LEFT JOIN fetch_failures f ON f.article_id = a.id
                     WHERE p.id IS NULL AND COALESCE(f.attempts, 0) < ?1",
                    params![max_attempts],
                )?)
            })
            .await?;
        Ok(articles)
    }

    /// Stores a preview for the article unless it is gone or already has one.
    ///
    /// An existing preview is never overwritten.
    pub async fn attach_preview(&self, article_id: &str, preview: NewPreview) -> Result<AttachOutcome> {
        let id = article_id.to_string();
        let outcome = self
            .store
            .connection()
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                if !row_exists(&tx, "SELECT EXISTS(SELECT 1 FROM articles WHERE id = ?1)", params![id])? {
                    return Ok(AttachOutcome::ArticleMissing);
                }
                if row_exists(
                    &tx,
                    "SELECT EXISTS(SELECT 1 FROM previews WHERE article_id = ?1)",
                    params![id],
                )? {
                    return Ok(AttachOutcome::AlreadyPresent);
                }
                tx.execute(
                    "INSERT INTO previews (article_id, title, image_url, fetched_at) VALUES (?1, ?2, ?3, ?4)",
                    params![id, preview.title, preview.image_url, format_timestamp(&Utc::now())],
                )?;
                tx.execute("DELETE FROM fetch_failures WHERE article_id = ?1", params![id])?;
                tx.commit()?;
                Ok(AttachOutcome::Attached)
            })
            .await?;

        tracing::debug!("Attach preview to {}: {:?}", article_id, outcome);
        Ok(outcome)
    }

    /// Counts one more failed fetch for the article. Unknown ids are ignored.
    pub async fn record_fetch_failure(&self, article_id: &str, reason: &str) -> Result<()> {
        let id = article_id.to_string();
        let reason = reason.to_string();
        self.store
            .connection()
            .call(move |conn| {
                conn.execute(
                    r#"INSERT INTO fetch_failures (article_id, attempts, last_error, last_attempt_at)
                       SELECT ?1, 1, ?2, ?3
                       WHERE EXISTS (SELECT 1 FROM articles WHERE id = ?1)
                       ON CONFLICT(article_id) DO UPDATE SET
                           attempts = attempts + 1,
                           last_error = excluded.last_error,
                           last_attempt_at = excluded.last_attempt_at"#,
                    params![id, reason, format_timestamp(&Utc::now())],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}

fn select_articles(conn: &Connection, filter: &str, params: impl Params) -> rusqlite::Result<Vec<Article>> {
    let sql = format!("{} {} {}", ARTICLE_SELECT, filter, ARTICLE_ORDER);
    let mut stmt = conn.prepare(&sql)?;
    let mut articles = stmt
        .query_map(params, article_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let ids: Vec<&ArticleId> = articles.iter().map(|a| &a.id).collect();
    let mut memberships = load_group_ids_by_article(conn, &ids)?;
    for article in &mut articles {
        article.group_ids = memberships.remove(&article.id).unwrap_or_default();
    }
    Ok(articles)
}

fn select_groups(conn: &Connection, filter: &str, params: impl Params) -> rusqlite::Result<Vec<Group>> {
    let sql = format!(
        "SELECT g.id, g.name FROM article_groups g {filter} ORDER BY g.name COLLATE NOCASE ASC, g.id ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut groups = stmt
        .query_map(params, |row| {
            Ok(Group {
                id: row.get(0)?,
                name: row.get(1)?,
                article_ids: Vec::new(),
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let ids: Vec<&GroupId> = groups.iter().map(|g| &g.id).collect();
    let mut members = load_article_ids_by_group(conn, &ids)?;
    for group in &mut groups {
        group.article_ids = members.remove(&group.id).unwrap_or_default();
    }
    Ok(groups)
}

fn load_group_ids_by_article(
    conn: &Connection,
    article_ids: &[&ArticleId],
) -> rusqlite::Result<HashMap<ArticleId, Vec<GroupId>>> {
    load_edges(
        conn,
        r#"SELECT m.article_id, m.group_id
           FROM group_members m
           JOIN article_groups g ON g.id = m.group_id
           WHERE m.article_id IN ({ids})
           ORDER BY g.name COLLATE NOCASE ASC, g.id ASC"#,
        article_ids,
    )
}

fn load_article_ids_by_group(
    conn: &Connection,
    group_ids: &[&GroupId],
) -> rusqlite::Result<HashMap<GroupId, Vec<ArticleId>>> {
    load_edges(
        conn,
        r#"SELECT m.group_id, m.article_id
           FROM group_members m
           JOIN articles a ON a.id = m.article_id
           WHERE m.group_id IN ({ids})
           ORDER BY a.created_at DESC, a.rowid DESC"#,
        group_ids,
    )
}

/// Runs `sql` once per chunk of `keys`, substituting `{ids}` with placeholders,
/// and groups the `(key, value)` rows by key. Each key lands in exactly one chunk,
/// so the per-key order of the query is kept.
fn load_edges<K, V>(conn: &Connection, sql: &str, keys: &[&K]) -> rusqlite::Result<HashMap<K, Vec<V>>>
where
    K: ToSql + rusqlite::types::FromSql + Eq + std::hash::Hash,
    V: rusqlite::types::FromSql,
{
    let mut edges: HashMap<K, Vec<V>> = HashMap::new();
    for chunk in keys.chunks(MAX_IN_PARAMS) {
        let placeholders = vec!["?"; chunk.len()].join(", ");
        let mut stmt = conn.prepare(&sql.replace("{ids}", &placeholders))?;
        let mut rows = stmt.query(params_from_iter(chunk.iter()))?;
        while let Some(row) = rows.next()? {
            edges.entry(row.get(0)?).or_default().push(row.get(1)?);
        }
    }
    Ok(edges)
}

fn row_exists(conn: &Connection, sql: &str, params: impl Params) -> rusqlite::Result<bool> {
    let exists: i64 = conn.query_row(sql, params, |row| row.get(0))?;
    Ok(exists == 1)
}

fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

// Every stored timestamp is written by `format_timestamp` (e.g. "2026-01-11T12:34:56.000000Z").
fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn timestamp_at(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_datetime(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, format!("invalid timestamp {raw:?}").into())
    })
}

fn article_from_row(row: &Row) -> rusqlite::Result<Article> {
    let id: ArticleId = row.get(0)?;
    let preview = match row.get::<_, Option<i64>>(3)? {
        Some(preview_id) => Some(PreviewMetadata {
            id: preview_id,
            article_id: id.clone(),
            title: row.get(4)?,
            image_url: row.get(5)?,
            fetched_at: timestamp_at(row, 6)?,
        }),
        None => None,
    };

    Ok(Article {
        id,
        url: row.get(1)?,
        created_at: timestamp_at(row, 2)?,
        group_ids: Vec::new(),
        preview,
    })
}

#[cfg(test)]
impl Repository {
    pub async fn fetch_attempts(&self, article_id: &str) -> Result<u32> {
        use rusqlite::OptionalExtension;

        let id = article_id.to_string();
        let attempts = self
            .store
            .connection()
            .call(move |conn| {
                let attempts: Option<u32> = conn
                    .query_row(
                        "SELECT attempts FROM fetch_failures WHERE article_id = ?1",
                        params![id],
                        |row| row.get(0),
                    )
                    .optional()?;
                Ok(attempts.unwrap_or(0))
            })
            .await?;
        Ok(attempts)
    }
}

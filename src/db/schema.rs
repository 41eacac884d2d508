pub const SCHEMA: &str = r#"
-- articles table
CREATE TABLE IF NOT EXISTS articles (
    id TEXT PRIMARY KEY NOT NULL,
    url TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_articles_created_at ON articles(created_at DESC);

-- article_groups table
CREATE TABLE IF NOT EXISTS article_groups (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_article_groups_name ON article_groups(name COLLATE NOCASE);

-- group_members table (article <-> group join)
CREATE TABLE IF NOT EXISTS group_members (
    article_id TEXT NOT NULL REFERENCES articles(id),
    group_id INTEGER NOT NULL REFERENCES article_groups(id),
    added_at TEXT NOT NULL,
    PRIMARY KEY (article_id, group_id)
);

CREATE INDEX IF NOT EXISTS idx_group_members_group_id ON group_members(group_id);

-- previews table (at most one per article)
CREATE TABLE IF NOT EXISTS previews (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    article_id TEXT NOT NULL UNIQUE REFERENCES articles(id),
    title TEXT,
    image_url TEXT,
    fetched_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_previews_article_id ON previews(article_id);

-- fetch_failures table (bounds how often an unreachable URL is retried)
CREATE TABLE IF NOT EXISTS fetch_failures (
    article_id TEXT PRIMARY KEY NOT NULL REFERENCES articles(id),
    attempts INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    last_attempt_at TEXT NOT NULL
);
"#;

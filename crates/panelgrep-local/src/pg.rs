//! Postgres persistence for the catalog and the user registry.
//!
//! Schema migration proper is external; `ensure_schema` only bootstraps the
//! two tables so a fresh database is usable.

use panelgrep_core::{
    CatalogStore, Comic, ComicId, Comics, Error, Result, Role, User, UserStore,
};
use sqlx::postgres::PgPool;
use sqlx::Row;
use std::collections::BTreeSet;

fn backend(e: sqlx::Error) -> Error {
    Error::Backend(e.to_string())
}

#[derive(Clone)]
pub struct PgCatalogStore {
    pool: PgPool,
}

impl PgCatalogStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS comics (
                id INT PRIMARY KEY,
                img TEXT NOT NULL,
                keywords TEXT[] NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl CatalogStore for PgCatalogStore {
    async fn save(&self, comics: &Comics) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        for (id, comic) in comics {
            sqlx::query("INSERT INTO comics (id, img, keywords) VALUES ($1, $2, $3)")
                .bind(*id)
                .bind(&comic.img)
                .bind(&comic.keywords)
                .execute(&mut *tx)
                .await
                .map_err(backend)?;
        }
        tx.commit().await.map_err(backend)
    }

    async fn get_all(&self) -> Result<Comics> {
        let rows = sqlx::query("SELECT id, img, keywords FROM comics")
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;

        let mut comics = Comics::new();
        for row in rows {
            let id: ComicId = row.try_get("id").map_err(backend)?;
            comics.insert(
                id,
                Comic {
                    img: row.try_get("img").map_err(backend)?,
                    keywords: row.try_get("keywords").map_err(backend)?,
                },
            );
        }
        Ok(comics)
    }

    async fn get_by_id(&self, id: ComicId) -> Result<Comic> {
        let row = sqlx::query("SELECT img, keywords FROM comics WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?
            .ok_or_else(|| Error::NotFound(format!("comic {id}")))?;

        Ok(Comic {
            img: row.try_get("img").map_err(backend)?,
            keywords: row.try_get("keywords").map_err(backend)?,
        })
    }

    async fn get_all_ids(&self) -> Result<BTreeSet<ComicId>> {
        let rows = sqlx::query("SELECT id FROM comics")
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;

        let mut ids = BTreeSet::new();
        for row in rows {
            ids.insert(row.try_get::<ComicId, _>("id").map_err(backend)?);
        }
        Ok(ids)
    }

    async fn total(&self) -> Result<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM comics")
            .fetch_one(&self.pool)
            .await
            .map_err(backend)?;
        let n: i64 = row.try_get("n").map_err(backend)?;
        Ok(n as u64)
    }
}

#[derive(Clone)]
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS users (
                username TEXT PRIMARY KEY,
                password_hash TEXT NOT NULL,
                role TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl UserStore for PgUserStore {
    async fn save(&self, user: &User) -> Result<()> {
        sqlx::query("INSERT INTO users (username, password_hash, role) VALUES ($1, $2, $3)")
            .bind(&user.username)
            .bind(&user.password_hash)
            .bind(user.role.as_str())
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn get_by_username(&self, username: &str) -> Result<Option<User>> {
        let row = sqlx::query("SELECT username, password_hash, role FROM users WHERE username = $1")
            .bind(username)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let role: String = row.try_get("role").map_err(backend)?;
        Ok(Some(User {
            username: row.try_get("username").map_err(backend)?,
            password_hash: row.try_get("password_hash").map_err(backend)?,
            role: Role::parse(&role),
        }))
    }
}

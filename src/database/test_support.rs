//! 测试用 SQLite 临时库：跑真实迁移并写入套餐目录

use chrono::Utc;
use sea_orm::{ActiveModelTrait, Set};
use tempfile::NamedTempFile;

use super::{DbPool, create_pool, run_migrations};
use crate::config::DatabaseConfig;
use crate::entities::user_entity;
use crate::services::PackageService;

pub async fn setup_test_db() -> (DbPool, NamedTempFile) {
    let temp_file = NamedTempFile::new().unwrap();
    let config = DatabaseConfig {
        url: format!("sqlite:{}?mode=rwc", temp_file.path().display()),
        // 单连接：事务内的并发请求按顺序执行
        max_connections: 1,
    };
    let pool = create_pool(&config).await.unwrap();
    run_migrations(&pool).await.unwrap();
    PackageService::new(pool.clone()).seed_defaults().await.unwrap();
    (pool, temp_file)
}

pub async fn create_test_user(pool: &DbPool, email: &str) -> user_entity::Model {
    let now = Utc::now();
    user_entity::ActiveModel {
        name: Set("Test User".to_string()),
        email: Set(email.to_string()),
        password_hash: Set("not-a-real-hash".to_string()),
        role: Set("user".to_string()),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(pool)
    .await
    .unwrap()
}

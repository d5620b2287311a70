//! 基础示例：两名玩家在内存后端上走完一局的同步流程
//!
//! 运行：`cargo run --example basic`

use std::sync::Arc;

use gamesync_sdk::{
    GameSyncConfig, GameSyncSDK, MemoryCloud, Scope, SessionEvent, ZoneId, DEFAULT_ZONE_NAME,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct GameData {
    #[serde(rename = "someString")]
    some_string: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // 一台"服务器"，两个账号
    let cloud = MemoryCloud::new();
    cloud.register_account("p1", "Player One").await;
    cloud.register_account("p2", "Player Two").await;

    let dir1 = tempfile::tempdir()?;
    let dir2 = tempfile::tempdir()?;
    let sdk1 = GameSyncSDK::initialize(
        GameSyncConfig::builder().data_dir(dir1.path()).build()?,
        Arc::new(cloud.store_for("p1")),
    )
    .await?;
    let sdk2 = GameSyncSDK::initialize(
        GameSyncConfig::builder().data_dir(dir2.path()).build()?,
        Arc::new(cloud.store_for("p2")),
    )
    .await?;
    sdk1.connect().await?;
    sdk2.connect().await?;

    let mut p2_events = sdk2.events().subscribe();

    // p1 建会话并共享给 p2
    let session = sdk1.sessions().create_session("Match 1").await?;
    println!("p1 created session {} ({})", session.title(), session.id());
    let zone = ZoneId::new(DEFAULT_ZONE_NAME, "p1");
    cloud.invite(&zone, "p2").await?;
    sdk2.connector().accept_share(&zone).await?;

    // p2 拉共享分区增量：自动补位成为对手
    sdk2.handle_remote_notification(Scope::Shared).await?;
    if let Ok(SessionEvent::SessionJoined { session, player, .. }) = p2_events.try_recv() {
        println!(
            "p2 joined session {} as {}",
            session.title(),
            player.display_name.as_deref().unwrap_or("?")
        );
    }

    // p1 同步到对手加入，然后保存对局数据
    sdk1.handle_remote_notification(Scope::Private).await?;
    let mut session = sdk1
        .sessions()
        .cached_sessions()
        .await?
        .into_iter()
        .next()
        .expect("session cached");
    sdk1.sessions()
        .save_game_data(
            &mut session,
            &GameData {
                some_string: "hello".to_string(),
            },
        )
        .await?;
    println!("p1 saved game data");

    // p2 收到数据保存通知
    sdk2.handle_remote_notification(Scope::Shared).await?;
    while let Ok(event) = p2_events.try_recv() {
        if let SessionEvent::SessionDataSaved { player, payload, .. } = event {
            println!(
                "p2 received data from {}: {}",
                player.display_name.as_deref().unwrap_or("?"),
                payload
            );
        }
    }

    sdk1.shutdown().await?;
    sdk2.shutdown().await?;
    Ok(())
}

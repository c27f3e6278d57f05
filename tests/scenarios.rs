//! End-to-end flows against the in-memory platform.

use forumkeeper::config::Config;
use forumkeeper::db::{Post, RecordStatus, StoreManager, UpdateMode};
use forumkeeper::moderation::PunishRequest;
use forumkeeper::navigation::NavigationRequest;
use forumkeeper::platform::fake::{starter, thread, FakePlatform, RoleOp};
use forumkeeper::platform::{MemberInfo, ThreadInfo};
use forumkeeper::scanner::ScanMode;
use forumkeeper::scheduler::run_daily_tick;
use forumkeeper::settings::{ActionConfig, ConfigSnapshot, ConfigStore, GuildTask, LevelConfig, PartitionConfig};
use forumkeeper::shutdown::Shutdown;
use forumkeeper::App;
use std::sync::Arc;

struct Harness {
    fake: Arc<FakePlatform>,
    app: Arc<App>,
    _dir: tempfile::TempDir,
}

fn partitions(pairs: &[(&str, &str)]) -> ConfigSnapshot {
    let mut task = GuildTask {
        name: "G".into(),
        guilds_id: "g".into(),
        ..Default::default()
    };
    for (name, channel) in pairs {
        task.data.insert(
            name.to_string(),
            PartitionConfig {
                channel_id: channel.to_string(),
                thread_ids: vec![],
            },
        );
    }
    let mut snapshot = ConfigSnapshot::default();
    snapshot.tasks.insert("g".into(), task);
    snapshot
}

fn harness(snapshot: ConfigSnapshot) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let fake = Arc::new(FakePlatform::new());
    let app = App::new(
        Config::for_data_dir(dir.path()),
        Arc::new(ConfigStore::from_snapshot(snapshot)),
        Arc::new(StoreManager::in_memory()),
        fake.clone(),
        Shutdown::never(),
    );
    Harness { fake, app, _dir: dir }
}

fn work(id: String, created_at: i64) -> Post {
    Post {
        title: format!("work {}", id),
        id,
        author_id: "u".into(),
        created_at,
        ..Default::default()
    }
}

#[tokio::test]
async fn active_scan_of_two_partitions() {
    let h = harness(partitions(&[("news", "c0001"), ("art", "c0002")]));
    h.fake.add_active_thread(thread("t1", "g", "c0001", 1000), starter("t1", "a", "one"));
    h.fake.add_active_thread(thread("t2", "g", "c0001", 2000), starter("t2", "a", "two"));
    h.fake.add_active_thread(thread("t3", "g", "c0002", 1500), starter("t3", "b", "three"));

    let first = h.app.scanner.scan(ScanMode::Active, None, &h.app.shutdown).await;
    assert_eq!(first.total_new_posts, 3);
    let db = h.app.stores.guild("g").unwrap();
    let mut news = db.post_ids("news_0001").unwrap();
    news.sort();
    assert_eq!(news, vec!["t1", "t2"]);
    assert_eq!(db.post_ids("art_0002").unwrap(), vec!["t3"]);

    let before = db.get_post("news_0001", "t1").unwrap().unwrap();
    let second = h.app.scanner.scan(ScanMode::Active, None, &h.app.shutdown).await;
    assert_eq!(second.total_new_posts, 0);
    assert_eq!(db.get_post("news_0001", "t1").unwrap().unwrap(), before);
    assert_eq!(db.post_ids("news_0001").unwrap().len(), 2);
    assert_eq!(db.post_ids("art_0002").unwrap(), vec!["t3"]);
}

#[tokio::test]
async fn moderation_escalation_and_timer() {
    let mut action = ActionConfig::default();
    action.levels.insert(
        "0".into(),
        LevelConfig {
            add_role_ids: vec!["r_m1".into()],
            add_role_timeout_minutes: 60,
            ..Default::default()
        },
    );
    action.levels.insert(
        "1".into(),
        LevelConfig {
            add_role_ids: vec!["r_m2".into()],
            add_role_timeout_minutes: 180,
            timeout: "1".into(),
            ..Default::default()
        },
    );
    let mut snapshot = ConfigSnapshot::default();
    snapshot.moderation.entry("g".into()).or_default().insert("mute".into(), action);
    let h = harness(snapshot);
    h.fake.add_member(
        "g",
        MemberInfo {
            user_id: "u".into(),
            display_name: "User".into(),
            ..Default::default()
        },
    );

    let t = 1_700_000_000;
    let request = |now: i64| PunishRequest {
        guild_id: "g".into(),
        channel_id: "mod-log".into(),
        admin_id: "admin".into(),
        user_id: "u".into(),
        action_type: "mute".into(),
        reason: "spam".into(),
        interaction_id: format!("i{}", now),
        now,
        ..Default::default()
    };

    let first = h.app.moderation.apply(&request(t)).await.unwrap();
    assert_eq!(first.level, 0);
    assert_eq!(first.roles_remove_at.get("r_m1"), Some(&(t + 60 * 60)));

    let second = h.app.moderation.apply(&request(t + 5 * 60)).await.unwrap();
    assert_eq!(second.level, 1);
    assert_eq!(second.roles_remove_at.get("r_m2"), Some(&(t + 5 * 60 + 180 * 60)));
    let member = h.fake.member("g", "u").unwrap();
    assert_eq!(member.timed_out_until, Some(t + 5 * 60 + 86_400));
    assert!(member.roles.contains(&"r_m1".to_string()));
    assert!(member.roles.contains(&"r_m2".to_string()));

    h.app.timer.tick(t + 61 * 60).await;
    assert!(h.fake.role_ops().contains(&RoleOp::Remove {
        guild_id: "g".into(),
        user_id: "u".into(),
        role_id: "r_m1".into(),
    }));
    let record = h.app.moderation.get_record("g", first.punishment_id).await.unwrap().unwrap();
    assert_eq!(record.status, RecordStatus::Completed);
    let still = h.app.moderation.get_record("g", second.punishment_id).await.unwrap().unwrap();
    assert_eq!(still.status, RecordStatus::Active);
    assert!(h.fake.member("g", "u").unwrap().roles.contains(&"r_m2".to_string()));
}

#[tokio::test]
async fn personal_nav_refresh_with_edit() {
    let h = harness(partitions(&[("art", "c5678")]));
    h.fake.add_channel(ThreadInfo {
        id: "nav-channel".into(),
        ..Default::default()
    });
    let db = h.app.stores.guild("g").unwrap();
    db.ensure_post_table("art_5678").unwrap();
    for i in 0..5 {
        db.insert_post("art_5678", &work(format!("p{}", i), 1000 + i)).unwrap();
    }

    let nav = h
        .app
        .navigation
        .create(&NavigationRequest {
            user_id: "u".into(),
            user_name: "Ann".into(),
            guild_id: "g".into(),
            slot: 1,
            table_names: vec!["art_5678".into()],
            message_channel_id: "nav-channel".into(),
            update_mode: UpdateMode::Edit,
        })
        .await
        .unwrap();
    assert_eq!(nav.my_works_message_ids.len(), 1);
    let (m1, m2, m3) = (
        nav.my_works_message_ids[0].clone(),
        nav.top_works_message_id.clone(),
        nav.latest_works_message_id.clone(),
    );

    for i in 5..25 {
        db.insert_post("art_5678", &work(format!("p{}", i), 1000 + i)).unwrap();
    }
    let refreshed = h.app.navigation.update(&nav, "Ann").await.unwrap();
    assert_eq!(refreshed.my_works_message_ids.len(), 2);
    assert_eq!(refreshed.my_works_message_ids[0], m1);
    let m4 = refreshed.my_works_message_ids[1].clone();
    assert!(![m1.clone(), m2.clone(), m3.clone()].contains(&m4));
    assert_eq!(refreshed.top_works_message_id, m2);
    assert_eq!(refreshed.latest_works_message_id, m3);

    let edited: Vec<String> = h.fake.edits().into_iter().map(|e| e.message_id).collect();
    for id in [&m1, &m2, &m3] {
        assert!(edited.contains(id));
    }
    assert!(h.fake.deletes().is_empty());

    let stored = h.app.navigation.slots("u", "g").await.unwrap();
    assert_eq!(stored[0].my_works_message_ids, vec![m1, m4]);
}

#[tokio::test]
async fn archived_thread_is_skipped_by_batch_refresh() {
    let h = harness(partitions(&[("art", "c5678")]));
    h.fake.add_channel(ThreadInfo {
        id: "nav-thread".into(),
        is_thread: true,
        ..Default::default()
    });
    h.app.stores.guild("g").unwrap().ensure_post_table("art_5678").unwrap();
    h.app
        .navigation
        .create(&NavigationRequest {
            user_id: "u".into(),
            user_name: "Ann".into(),
            guild_id: "g".into(),
            slot: 2,
            table_names: vec!["art_5678".into()],
            message_channel_id: "nav-thread".into(),
            update_mode: UpdateMode::Edit,
        })
        .await
        .unwrap();
    h.fake.add_channel(ThreadInfo {
        id: "nav-thread".into(),
        is_thread: true,
        archived: true,
        ..Default::default()
    });

    let navs = h.app.nav_batch.load_all(&["g".to_string()]).await;
    assert_eq!(navs.len(), 1);
    let summary = h.app.nav_batch.run(navs, &h.app.shutdown).await;
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.success, 0);
}

#[tokio::test]
async fn deletion_reconciler_drops_missing_threads() {
    let h = harness(partitions(&[("news", "c0001")]));
    let db = h.app.stores.guild("g").unwrap();
    db.ensure_post_table("news_0001").unwrap();
    for id in ["a", "b", "c"] {
        db.insert_post("news_0001", &work(id.to_string(), 10)).unwrap();
    }
    h.fake.add_active_thread(thread("a", "g", "c0001", 10), starter("a", "u", ""));
    h.fake.add_active_thread(thread("c", "g", "c0001", 10), starter("c", "u", ""));

    let summary = h.app.reconciler.run(&h.app.shutdown).await;
    assert_eq!(summary.deleted, 1);
    let mut left = db.post_ids("news_0001").unwrap();
    left.sort();
    assert_eq!(left, vec!["a", "c"]);
}

#[tokio::test]
async fn daily_runner_escalates_to_full_scan() {
    let h = harness(partitions(&[("news", "c0001")]));
    h.app
        .scanner
        .lock_file()
        .update(|lock| {
            lock.scan_mode = "active".into();
            lock.timestamp = 1;
            lock.active_scan_count = 20;
        })
        .unwrap();

    let before = chrono::Utc::now().timestamp();
    let outcome = run_daily_tick(&h.app, 5).await;
    assert!(outcome.full_scan);
    assert_eq!(outcome.active_scan_count, 0);

    let lock = h.app.scanner.lock_file().load().unwrap();
    assert_eq!(lock.scan_mode, "full");
    assert_eq!(lock.active_scan_count, 0);
    assert!(lock.timestamp >= before);
}

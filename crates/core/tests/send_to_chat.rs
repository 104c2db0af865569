use std::sync::atomic::Ordering;

use tempfile::TempDir;
use tgdrop_core::{
    ChannelRecord, ChatRecord, Conversation, DialogEntities, DialogsPage, DispatchConfig, Error,
    GroupRecord, Identity, InMemoryBackend, ListingClass, ResolvedPeer, dispatch, fetch_directory,
    list_images, resolve,
};

fn dialogs() -> DialogsPage {
    DialogsPage::Slice {
        total: 250,
        entities: DialogEntities {
            conversations: vec![
                Conversation::user(10),
                Conversation::group(20),
                Conversation::channel(30),
                Conversation::channel(31),
            ],
            users: vec![Identity {
                id: 10,
                first_name: "Ada".to_string(),
                last_name: "Lovelace".to_string(),
                username: Some("ada".to_string()),
                access_hash: Some(77),
            }],
            chats: vec![
                ChatRecord::Group(GroupRecord {
                    id: 20,
                    title: "Family".to_string(),
                }),
                ChatRecord::Channel(ChannelRecord {
                    id: 30,
                    title: "News".to_string(),
                    username: Some("news".to_string()),
                    megagroup: false,
                    access_hash: Some(-5),
                }),
                ChatRecord::Channel(ChannelRecord {
                    id: 31,
                    title: "Builders".to_string(),
                    username: None,
                    megagroup: true,
                    access_hash: Some(8),
                }),
            ],
        },
    }
}

#[tokio::test]
async fn images_in_a_folder_reach_the_resolved_channel_in_name_order() {
    let temp = TempDir::new().unwrap();
    let images = temp.path().join("images");
    std::fs::create_dir_all(images.join("nested")).unwrap();
    std::fs::write(images.join("b.JPG"), b"jpg").unwrap();
    std::fs::write(images.join("a.png"), b"png").unwrap();
    std::fs::write(images.join("notes.txt"), b"txt").unwrap();
    std::fs::write(images.join("nested").join("c.png"), b"png").unwrap();

    let backend = InMemoryBackend::new(dialogs());
    let snapshot = fetch_directory(&backend).await.unwrap();
    assert_eq!(snapshot.hidden_count(), 246);

    let peer = resolve(&snapshot, 30).unwrap();
    assert_eq!(
        peer,
        ResolvedPeer::Channel {
            id: 30,
            access_hash: -5
        }
    );

    let files = list_images(&images).unwrap();
    let res = dispatch(&backend, &peer, &files, &DispatchConfig { delay_ms: 0 })
        .await
        .unwrap();
    assert_eq!((res.attempted, res.sent, res.failed), (2, 2, 0));

    let sent = backend.sent().await;
    let names: Vec<&str> = sent.iter().map(|s| s.filename.as_str()).collect();
    assert_eq!(names, vec!["a.png", "b.JPG"]);
    assert_eq!(backend.dialog_fetches.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn listing_classifies_every_addressable_conversation() {
    let backend = InMemoryBackend::new(dialogs());
    let snapshot = fetch_directory(&backend).await.unwrap();
    let listing = snapshot.listing();

    let classes: Vec<(ListingClass, i64)> = listing.iter().map(|e| (e.class, e.id)).collect();
    assert_eq!(
        classes,
        vec![
            (ListingClass::User, 10),
            (ListingClass::Group, 20),
            (ListingClass::Channel, 30),
            (ListingClass::SuperGroup, 31),
        ]
    );
    assert_eq!(listing[0].to_string(), "User   | ID: 10 | Ada Lovelace (@ada)");
    assert_eq!(listing[2].to_string(), "Channel | ID: 30 (@news) | News");
    assert_eq!(listing[3].to_string(), "SuperGroup | ID: 31 | Builders");
}

#[tokio::test]
async fn unknown_target_fails_before_any_upload() {
    let backend = InMemoryBackend::new(dialogs());
    let snapshot = fetch_directory(&backend).await.unwrap();

    let err = resolve(&snapshot, 999).unwrap_err();
    assert!(matches!(err, Error::TargetNotFound { target_id: 999 }));
    assert_eq!(backend.uploaded.load(Ordering::Relaxed), 0);
}

#[tokio::test]
async fn unreachable_directory_is_reported_once_without_retry() {
    let backend = InMemoryBackend::unavailable();
    let err = fetch_directory(&backend).await.unwrap_err();
    assert!(matches!(err, Error::DirectoryUnavailable { .. }));
    assert_eq!(backend.dialog_fetches.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn a_folder_without_images_yields_an_empty_batch() {
    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join("readme.md"), b"hi").unwrap();

    let files = list_images(temp.path()).unwrap();
    assert!(files.is_empty());

    let backend = InMemoryBackend::new(dialogs());
    let err = dispatch(
        &backend,
        &ResolvedPeer::Group { id: 20 },
        &files,
        &DispatchConfig::default(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, Error::EmptyBatch));
}

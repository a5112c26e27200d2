//! Message and group persistence boundary.
//!
//! Every message is written once as content and fanned out as one index
//! entry per party: both accounts of a one-to-one message, every member of a
//! group. Offline sync reads an account's index first and then fetches the
//! contents it is missing.

use std::{
    sync::atomic::{AtomicI64, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use dashmap::DashMap;
use relaygate_proto::messages::{Member, MessageContent, MessageIndex};

use crate::error::ServiceError;

/// Most index entries returned by one offline sync.
pub const OFFLINE_SYNC_LIMIT: usize = 3000;

/// A message to store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InsertMessage {
    /// Sending account
    pub sender: String,
    /// Receiving account or group
    pub dest: String,
    /// Send time, unix nanoseconds
    pub send_time: i64,
    /// Application defined message type
    pub kind: i32,
    /// Message body
    pub body: String,
    /// Application defined extra data
    pub extra: String,
}

/// A group to create.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewGroup {
    /// Display name
    pub name: String,
    /// Avatar url
    pub avatar: String,
    /// Free text introduction
    pub introduction: String,
    /// Owning account
    pub owner: String,
    /// Initial members
    pub members: Vec<String>,
}

/// Stored group attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupInfo {
    /// Group id
    pub id: String,
    /// Display name
    pub name: String,
    /// Avatar url
    pub avatar: String,
    /// Free text introduction
    pub introduction: String,
    /// Owning account
    pub owner: String,
    /// Creation time, unix seconds
    pub created_at: i64,
}

/// Stores messages, read positions and group membership.
#[async_trait]
pub trait MessageService: Send + Sync + 'static {
    /// Store a one-to-one message and return its id.
    async fn insert_user(&self, app: &str, msg: InsertMessage) -> Result<i64, ServiceError>;

    /// Store a group message and return its id.
    async fn insert_group(&self, app: &str, msg: InsertMessage) -> Result<i64, ServiceError>;

    /// Record that `account` has read up to `message_id`.
    async fn set_ack(&self, app: &str, account: &str, message_id: i64) -> Result<(), ServiceError>;

    /// Index entries of `account` newer than `after`, oldest first and at
    /// most [`OFFLINE_SYNC_LIMIT`]. An `after` of zero resumes from the
    /// account's last ack.
    async fn offline_index(&self, app: &str, account: &str, after: i64) -> Result<Vec<MessageIndex>, ServiceError>;

    /// Contents of whichever `ids` exist.
    async fn contents(&self, app: &str, ids: &[i64]) -> Result<Vec<MessageContent>, ServiceError>;

    /// Create a group and return its id.
    async fn create_group(&self, app: &str, group: NewGroup) -> Result<String, ServiceError>;

    /// Add `account` to `group`. Joining twice is a no-op.
    async fn join_group(&self, app: &str, group: &str, account: &str) -> Result<(), ServiceError>;

    /// Remove `account` from `group`.
    async fn quit_group(&self, app: &str, group: &str, account: &str) -> Result<(), ServiceError>;

    /// Attributes of `group`.
    async fn group(&self, app: &str, group: &str) -> Result<GroupInfo, ServiceError>;

    /// Members of `group`, most recently joined first.
    async fn members(&self, app: &str, group: &str) -> Result<Vec<Member>, ServiceError>;

    /// Accounts in `group`.
    async fn group_members(&self, app: &str, group: &str) -> Result<Vec<String>, ServiceError> {
        Ok(self.members(app, group).await?.into_iter().map(|m| m.account).collect())
    }
}

type Key = (String, String);

fn key(app: &str, id: &str) -> Key {
    (app.to_owned(), id.to_owned())
}

fn unix_secs() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map_or(0, |d| d.as_secs() as i64)
}

fn base36(mut n: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut out = Vec::new();
    loop {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
        if n == 0 {
            break;
        }
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

#[derive(Debug, Clone)]
struct StoredGroup {
    info: GroupInfo,
    // join order
    members: Vec<Member>,
}

/// In-process message store.
#[derive(Debug)]
pub struct MemoryMessageService {
    next_id: AtomicI64,
    messages: DashMap<i64, (String, InsertMessage)>,
    indexes: DashMap<Key, Vec<MessageIndex>>,
    groups: DashMap<Key, StoredGroup>,
    acks: DashMap<Key, i64>,
}

impl Default for MemoryMessageService {
    fn default() -> Self {
        Self {
            next_id: AtomicI64::new(1),
            messages: DashMap::new(),
            indexes: DashMap::new(),
            groups: DashMap::new(),
            acks: DashMap::new(),
        }
    }
}

impl MemoryMessageService {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or replace group `group` with `members`.
    pub fn set_group(&self, app: &str, group: &str, members: impl IntoIterator<Item = impl Into<String>>) {
        let now = unix_secs();
        let members = members
            .into_iter()
            .map(|account| Member { account: account.into(), join_time: now, ..Member::default() })
            .collect();
        let info = GroupInfo { id: group.to_owned(), name: group.to_owned(), created_at: now, ..GroupInfo::default() };
        self.groups.insert(key(app, group), StoredGroup { info, members });
    }

    /// Stored message by id.
    pub fn message(&self, id: i64) -> Option<InsertMessage> {
        self.messages.get(&id).map(|m| m.value().1.clone())
    }

    /// Number of stored messages.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether nothing has been stored.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Last acknowledged message id of `account`.
    pub fn ack(&self, app: &str, account: &str) -> Option<i64> {
        self.acks.get(&key(app, account)).map(|a| *a)
    }

    fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn insert(&self, app: &str, msg: InsertMessage) -> i64 {
        let id = self.next_id();
        self.messages.insert(id, (app.to_owned(), msg));
        id
    }

    fn index(&self, app: &str, account: &str, entry: MessageIndex) {
        self.indexes.entry(key(app, account)).or_default().push(entry);
    }

    fn not_found(group: &str) -> ServiceError {
        ServiceError::MessageStore(format!("group {group} not found"))
    }
}

#[async_trait]
impl MessageService for MemoryMessageService {
    async fn insert_user(&self, app: &str, msg: InsertMessage) -> Result<i64, ServiceError> {
        let (sender, dest, send_time) = (msg.sender.clone(), msg.dest.clone(), msg.send_time);
        let message_id = self.insert(app, msg);
        let entry = |direction, account_b: &str| MessageIndex {
            message_id,
            direction,
            send_time,
            account_b: account_b.to_owned(),
            group: String::new(),
        };
        self.index(app, &dest, entry(0, &sender));
        self.index(app, &sender, entry(1, &dest));
        Ok(message_id)
    }

    async fn insert_group(&self, app: &str, msg: InsertMessage) -> Result<i64, ServiceError> {
        let members = self.group_members(app, &msg.dest).await?;
        let (sender, group, send_time) = (msg.sender.clone(), msg.dest.clone(), msg.send_time);
        let message_id = self.insert(app, msg);
        for member in members {
            let entry = MessageIndex {
                message_id,
                direction: i32::from(member == sender),
                send_time,
                account_b: sender.clone(),
                group: group.clone(),
            };
            self.index(app, &member, entry);
        }
        Ok(message_id)
    }

    async fn set_ack(&self, app: &str, account: &str, message_id: i64) -> Result<(), ServiceError> {
        self.acks.entry(key(app, account)).and_modify(|a| *a = (*a).max(message_id)).or_insert(message_id);
        Ok(())
    }

    async fn offline_index(&self, app: &str, account: &str, after: i64) -> Result<Vec<MessageIndex>, ServiceError> {
        let after = if after == 0 { self.ack(app, account).unwrap_or(0) } else { after };
        let mut list: Vec<_> = self
            .indexes
            .get(&key(app, account))
            .map(|entries| entries.iter().filter(|e| e.message_id > after).cloned().collect())
            .unwrap_or_default();
        list.sort_by_key(|e| e.message_id);
        list.truncate(OFFLINE_SYNC_LIMIT);
        Ok(list)
    }

    async fn contents(&self, app: &str, ids: &[i64]) -> Result<Vec<MessageContent>, ServiceError> {
        Ok(ids
            .iter()
            .filter_map(|id| {
                let stored = self.messages.get(id)?;
                let (owner, msg) = stored.value();
                (owner == app).then(|| MessageContent {
                    message_id: *id,
                    kind: msg.kind,
                    body: msg.body.clone(),
                    extra: msg.extra.clone(),
                })
            })
            .collect())
    }

    async fn create_group(&self, app: &str, group: NewGroup) -> Result<String, ServiceError> {
        let id = base36(self.next_id().unsigned_abs());
        let now = unix_secs();
        let mut members: Vec<Member> = Vec::with_capacity(group.members.len());
        for account in group.members {
            if !members.iter().any(|m| m.account == account) {
                members.push(Member { account, join_time: now, ..Member::default() });
            }
        }
        let info = GroupInfo {
            id: id.clone(),
            name: group.name,
            avatar: group.avatar,
            introduction: group.introduction,
            owner: group.owner,
            created_at: now,
        };
        self.groups.insert(key(app, &id), StoredGroup { info, members });
        Ok(id)
    }

    async fn join_group(&self, app: &str, group: &str, account: &str) -> Result<(), ServiceError> {
        let mut stored = self.groups.get_mut(&key(app, group)).ok_or_else(|| Self::not_found(group))?;
        if !stored.members.iter().any(|m| m.account == account) {
            stored.members.push(Member { account: account.to_owned(), join_time: unix_secs(), ..Member::default() });
        }
        Ok(())
    }

    async fn quit_group(&self, app: &str, group: &str, account: &str) -> Result<(), ServiceError> {
        let mut stored = self.groups.get_mut(&key(app, group)).ok_or_else(|| Self::not_found(group))?;
        stored.members.retain(|m| m.account != account);
        Ok(())
    }

    async fn group(&self, app: &str, group: &str) -> Result<GroupInfo, ServiceError> {
        self.groups.get(&key(app, group)).map(|g| g.info.clone()).ok_or_else(|| Self::not_found(group))
    }

    async fn members(&self, app: &str, group: &str) -> Result<Vec<Member>, ServiceError> {
        self.groups
            .get(&key(app, group))
            .map(|g| g.members.iter().rev().cloned().collect())
            .ok_or_else(|| Self::not_found(group))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn talk(sender: &str, dest: &str, body: &str) -> InsertMessage {
        InsertMessage { sender: sender.into(), dest: dest.into(), body: body.into(), ..InsertMessage::default() }
    }

    #[tokio::test]
    async fn ids_increase() {
        let store = MemoryMessageService::new();
        let a = store.insert_user("demo", InsertMessage::default()).await.unwrap();
        let b = store.insert_user("demo", InsertMessage::default()).await.unwrap();
        assert!(b > a);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn group_messages_need_a_group() {
        let store = MemoryMessageService::new();
        let msg = InsertMessage { dest: "g1".into(), ..InsertMessage::default() };
        assert!(store.insert_group("demo", msg.clone()).await.is_err());

        store.set_group("demo", "g1", ["alice", "bob"]);
        assert!(store.insert_group("demo", msg).await.is_ok());
        assert_eq!(store.group_members("demo", "g1").await.unwrap(), ["bob", "alice"]);
        assert!(store.group_members("other", "g1").await.is_err());
    }

    #[tokio::test]
    async fn ack_only_moves_forward() {
        let store = MemoryMessageService::new();
        store.set_ack("demo", "alice", 5).await.unwrap();
        store.set_ack("demo", "alice", 3).await.unwrap();
        assert_eq!(store.ack("demo", "alice"), Some(5));
        assert_eq!(store.ack("demo", "bob"), None);
    }

    #[tokio::test]
    async fn user_messages_index_both_parties() {
        let store = MemoryMessageService::new();
        let id = store.insert_user("demo", talk("alice", "bob", "hi")).await.unwrap();

        let bob = store.offline_index("demo", "bob", 0).await.unwrap();
        assert_eq!(bob.len(), 1);
        assert_eq!((bob[0].message_id, bob[0].direction, bob[0].account_b.as_str()), (id, 0, "alice"));

        let alice = store.offline_index("demo", "alice", 0).await.unwrap();
        assert_eq!((alice[0].direction, alice[0].account_b.as_str()), (1, "bob"));
        assert!(store.offline_index("other", "bob", 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn offline_index_resumes_after_ack() {
        let store = MemoryMessageService::new();
        let first = store.insert_user("demo", talk("alice", "bob", "1")).await.unwrap();
        let second = store.insert_user("demo", talk("alice", "bob", "2")).await.unwrap();
        let third = store.insert_user("demo", talk("alice", "bob", "3")).await.unwrap();

        store.set_ack("demo", "bob", first).await.unwrap();
        let ids: Vec<_> = store.offline_index("demo", "bob", 0).await.unwrap().iter().map(|e| e.message_id).collect();
        assert_eq!(ids, [second, third]);

        let ids: Vec<_> =
            store.offline_index("demo", "bob", second).await.unwrap().iter().map(|e| e.message_id).collect();
        assert_eq!(ids, [third]);
    }

    #[tokio::test]
    async fn group_messages_index_every_member() {
        let store = MemoryMessageService::new();
        store.set_group("demo", "g1", ["alice", "bob"]);
        let id = store.insert_group("demo", talk("alice", "g1", "hey")).await.unwrap();

        let alice = store.offline_index("demo", "alice", 0).await.unwrap();
        let bob = store.offline_index("demo", "bob", 0).await.unwrap();
        assert_eq!((alice[0].direction, bob[0].direction), (1, 0));
        assert_eq!(bob[0].group, "g1");
        assert_eq!(bob[0].message_id, id);
    }

    #[tokio::test]
    async fn contents_skip_unknown_ids() {
        let store = MemoryMessageService::new();
        let id = store.insert_user("demo", talk("alice", "bob", "hello")).await.unwrap();

        let contents = store.contents("demo", &[id, 999]).await.unwrap();
        assert_eq!(contents.len(), 1);
        assert_eq!(contents[0].body, "hello");
        assert!(store.contents("other", &[id]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn group_membership_changes() {
        let store = MemoryMessageService::new();
        let group = NewGroup {
            name: "friends".into(),
            owner: "alice".into(),
            members: vec!["alice".into(), "bob".into(), "alice".into()],
            ..NewGroup::default()
        };
        let id = store.create_group("demo", group).await.unwrap();
        assert_eq!(store.group("demo", &id).await.unwrap().name, "friends");
        assert_eq!(store.group_members("demo", &id).await.unwrap(), ["bob", "alice"]);

        store.join_group("demo", &id, "carol").await.unwrap();
        store.join_group("demo", &id, "carol").await.unwrap();
        store.quit_group("demo", &id, "alice").await.unwrap();
        assert_eq!(store.group_members("demo", &id).await.unwrap(), ["carol", "bob"]);

        assert!(store.join_group("demo", "nope", "carol").await.is_err());
        assert!(store.group("other", &id).await.is_err());
    }

    #[test]
    fn base36_ids() {
        assert_eq!(base36(0), "0");
        assert_eq!(base36(35), "z");
        assert_eq!(base36(36), "10");
    }
}

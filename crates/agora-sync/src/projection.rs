//! Derived view projections.
//!
//! Pure functions from decoded snapshots to display structures. Each one is
//! recomputed from scratch on every snapshot: nothing accumulates between
//! calls except the explicit prior state a caller passes back in.

use std::collections::{BTreeMap, HashMap};

use agora_shared::schema::{ChatMessage, Comment, Post, Transaction, UserProfile};
use agora_shared::{DocumentId, Role, ThreadId, TransactionStatus, UserId};

/// Comments grouped under their post, oldest first.
///
/// Comments may arrive before the post they reference; they are indexed
/// anyway and surface once the post does.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommentIndex {
    by_post: BTreeMap<DocumentId, Vec<Comment>>,
}

impl CommentIndex {
    pub fn for_post(&self, post: &DocumentId) -> &[Comment] {
        self.by_post.get(post).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn count(&self, post: &DocumentId) -> usize {
        self.for_post(post).len()
    }

    pub fn posts(&self) -> impl Iterator<Item = &DocumentId> {
        self.by_post.keys()
    }
}

pub fn group_comments_by_post(comments: &[Comment]) -> CommentIndex {
    let mut by_post: BTreeMap<DocumentId, Vec<Comment>> = BTreeMap::new();
    for comment in comments {
        by_post
            .entry(comment.post_id.clone())
            .or_default()
            .push(comment.clone());
    }
    for list in by_post.values_mut() {
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    }
    CommentIndex { by_post }
}

/// Which page the user was looking at.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageState {
    pub index: usize,
}

impl PageState {
    pub fn next(self) -> Self {
        Self {
            index: self.index.saturating_add(1),
        }
    }

    pub fn prev(self) -> Self {
        Self {
            index: self.index.saturating_sub(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub index: usize,
    pub page_count: usize,
}

impl<T> Page<T> {
    pub fn has_next(&self) -> bool {
        self.index + 1 < self.page_count
    }

    pub fn has_prev(&self) -> bool {
        self.index > 0
    }

    pub fn state(&self) -> PageState {
        PageState { index: self.index }
    }
}

/// Slice one page out of `items`.
///
/// The prior index is clamped to the last page, so a shrinking snapshot never
/// leaves the user on a page that no longer exists. A page size of zero
/// yields a single empty page.
pub fn paginate<T: Clone>(items: &[T], page_size: usize, prior: PageState) -> Page<T> {
    if page_size == 0 || items.is_empty() {
        return Page {
            items: Vec::new(),
            index: 0,
            page_count: usize::from(page_size > 0),
        };
    }

    let page_count = items.len().div_ceil(page_size);
    let index = prior.index.min(page_count - 1);
    let start = index * page_size;
    let end = (start + page_size).min(items.len());
    Page {
        items: items[start..end].to_vec(),
        index,
        page_count,
    }
}

/// Badge shown next to an author's name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Badge {
    None,
    Premium,
    Pro,
    Admin,
}

impl From<Role> for Badge {
    fn from(role: Role) -> Self {
        match role {
            Role::User => Badge::None,
            Role::Premium => Badge::Premium,
            Role::Pro => Badge::Pro,
            Role::Admin => Badge::Admin,
        }
    }
}

/// Current role of every known user. Unknown users count as plain users.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoleTable {
    roles: HashMap<UserId, Role>,
}

impl RoleTable {
    pub fn from_users(users: &[UserProfile]) -> Self {
        Self {
            roles: users.iter().map(|u| (u.user_id(), u.role)).collect(),
        }
    }

    pub fn role_of(&self, user: &UserId) -> Role {
        self.roles.get(user).copied().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.roles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }
}

/// Anything written by a user.
pub trait Authored {
    fn author(&self) -> &UserId;
}

impl Authored for Post {
    fn author(&self) -> &UserId {
        &self.author_id
    }
}

impl Authored for Comment {
    fn author(&self) -> &UserId {
        &self.author_id
    }
}

impl Authored for ChatMessage {
    fn author(&self) -> &UserId {
        &self.sender_id
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Badged<T> {
    pub item: T,
    pub badge: Badge,
}

pub fn annotate_author_badges<T: Authored + Clone>(
    items: &[T],
    roles: &RoleTable,
) -> Vec<Badged<T>> {
    items
        .iter()
        .map(|item| Badged {
            badge: roles.role_of(item.author()).into(),
            item: item.clone(),
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reaction {
    None,
    Liked,
    Disliked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReactionSummary {
    pub likes: usize,
    pub dislikes: usize,
    pub comments: u64,
    pub viewer: Reaction,
}

pub fn reaction_summary(post: &Post, viewer: Option<&UserId>) -> ReactionSummary {
    let viewer = match viewer {
        Some(v) if post.likes.contains(v) => Reaction::Liked,
        Some(v) if post.dislikes.contains(v) => Reaction::Disliked,
        _ => Reaction::None,
    };
    ReactionSummary {
        likes: post.likes.len(),
        dislikes: post.dislikes.len(),
        comments: post.comments_count,
        viewer,
    }
}

/// Messages of one conversation, oldest first. `None` is the lobby.
pub fn chat_timeline(messages: &[ChatMessage], thread: Option<&ThreadId>) -> Vec<ChatMessage> {
    let mut timeline: Vec<ChatMessage> = messages
        .iter()
        .filter(|m| m.chat_id.as_ref() == thread)
        .cloned()
        .collect();
    timeline.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    timeline
}

/// One user's pending payment as shown in the review queue.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingReview {
    /// Oldest pending transaction of the user.
    pub transaction: Transaction,
    /// Further pending transactions of the same user.
    pub duplicates: usize,
}

/// Review queue: one entry per user with a pending transaction, oldest
/// submission first.
pub fn pending_by_user(transactions: &[Transaction]) -> Vec<PendingReview> {
    let mut by_user: BTreeMap<&UserId, Vec<&Transaction>> = BTreeMap::new();
    for tx in transactions
        .iter()
        .filter(|t| t.status == TransactionStatus::Pending)
    {
        by_user.entry(&tx.user_id).or_default().push(tx);
    }

    let mut queue: Vec<PendingReview> = by_user
        .into_values()
        .filter_map(|mut txs| {
            txs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
            let duplicates = txs.len().saturating_sub(1);
            txs.first().map(|oldest| PendingReview {
                transaction: (*oldest).clone(),
                duplicates,
            })
        })
        .collect();
    queue.sort_by(|a, b| {
        a.transaction
            .created_at
            .cmp(&b.transaction.created_at)
            .then_with(|| a.transaction.id.cmp(&b.transaction.id))
    });
    queue
}

/// Everything the feed renders for one post.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedCard {
    pub post: Post,
    pub badge: Badge,
    pub reactions: ReactionSummary,
    pub comments: Vec<Badged<Comment>>,
}

/// Feed cards in snapshot order.
pub fn feed_cards(
    posts: &[Post],
    comments: &CommentIndex,
    roles: &RoleTable,
    viewer: Option<&UserId>,
) -> Vec<FeedCard> {
    posts
        .iter()
        .map(|post| FeedCard {
            badge: roles.role_of(&post.author_id).into(),
            reactions: reaction_summary(post, viewer),
            comments: annotate_author_badges(comments.for_post(&post.id), roles),
            post: post.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    fn post(id: &str, author: &str) -> Post {
        Post {
            id: DocumentId::from(id),
            author_id: UserId::from(author),
            author_name: author.to_uppercase(),
            content: format!("content of {id}"),
            image_url: None,
            likes: vec![],
            dislikes: vec![],
            comments_count: 0,
            created_at: at(1),
        }
    }

    fn comment(id: &str, post: &str, author: &str, ms: i64) -> Comment {
        Comment {
            id: DocumentId::from(id),
            post_id: DocumentId::from(post),
            author_id: UserId::from(author),
            author_name: author.to_uppercase(),
            text: format!("comment {id}"),
            created_at: at(ms),
        }
    }

    fn message(id: &str, sender: &str, thread: Option<ThreadId>, ms: i64) -> ChatMessage {
        ChatMessage {
            id: DocumentId::from(id),
            sender_id: UserId::from(sender),
            sender_name: sender.to_uppercase(),
            text: id.to_string(),
            chat_id: thread,
            created_at: at(ms),
        }
    }

    fn tx(id: &str, user: &str, status: TransactionStatus, ms: i64) -> Transaction {
        Transaction {
            id: DocumentId::from(id),
            user_id: UserId::from(user),
            status,
            proof_url: format!("https://img.example/{id}.png"),
            reviewed_by: None,
            created_at: at(ms),
        }
    }

    fn user(id: &str, role: Role) -> UserProfile {
        UserProfile {
            id: DocumentId::from(id),
            email: format!("{id}@example.com"),
            display_name: id.to_string(),
            photo_url: None,
            bio: None,
            role,
            created_at: at(0),
        }
    }

    #[test]
    fn grouping_ignores_arrival_order() {
        let a = vec![
            comment("c2", "p1", "u1", 20),
            comment("c1", "p1", "u2", 10),
            comment("c3", "p2", "u1", 5),
        ];
        let mut b = a.clone();
        b.reverse();

        let index = group_comments_by_post(&a);
        assert_eq!(index, group_comments_by_post(&b));
        let ids: Vec<_> = index
            .for_post(&DocumentId::from("p1"))
            .iter()
            .map(|c| c.id.as_str())
            .collect();
        assert_eq!(ids, ["c1", "c2"]);
    }

    #[test]
    fn orphan_comments_are_kept() {
        let index = group_comments_by_post(&[comment("c1", "ghost", "u1", 1)]);
        assert_eq!(index.count(&DocumentId::from("ghost")), 1);
        assert!(index.for_post(&DocumentId::from("p1")).is_empty());
    }

    #[test]
    fn page_index_is_clamped_when_items_shrink() {
        let items: Vec<u32> = (0..25).collect();
        let page = paginate(&items, 10, PageState { index: 2 });
        assert_eq!(page.items, (20..25).collect::<Vec<_>>());
        assert_eq!(page.page_count, 3);
        assert!(!page.has_next());

        let shrunk: Vec<u32> = (0..12).collect();
        let page = paginate(&shrunk, 10, page.state());
        assert_eq!(page.index, 1);
        assert_eq!(page.items, vec![10, 11]);
        assert!(page.has_prev());
    }

    #[test]
    fn zero_page_size_is_empty() {
        let page = paginate(&[1, 2, 3], 0, PageState::default().next());
        assert!(page.items.is_empty());
        assert_eq!(page.page_count, 0);
        assert_eq!(page.index, 0);
    }

    #[test]
    fn empty_input_has_one_empty_page() {
        let page = paginate::<u8>(&[], 5, PageState { index: 4 });
        assert_eq!(page.page_count, 1);
        assert_eq!(page.index, 0);
        assert!(!page.has_next() && !page.has_prev());
    }

    #[test]
    fn badges_follow_roles() {
        let roles = RoleTable::from_users(&[user("admin", Role::Admin), user("pro", Role::Pro)]);
        let posts = [post("p1", "admin"), post("p2", "pro"), post("p3", "stranger")];
        let badges: Vec<_> = annotate_author_badges(&posts, &roles)
            .into_iter()
            .map(|b| b.badge)
            .collect();
        assert_eq!(badges, [Badge::Admin, Badge::Pro, Badge::None]);
    }

    #[test]
    fn viewer_reaction() {
        let mut p = post("p1", "a");
        p.likes = vec![UserId::from("u1"), UserId::from("u2")];
        p.dislikes = vec![UserId::from("u3")];
        p.comments_count = 4;

        let s = reaction_summary(&p, Some(&UserId::from("u3")));
        assert_eq!((s.likes, s.dislikes, s.comments), (2, 1, 4));
        assert_eq!(s.viewer, Reaction::Disliked);
        assert_eq!(reaction_summary(&p, Some(&UserId::from("u1"))).viewer, Reaction::Liked);
        assert_eq!(reaction_summary(&p, None).viewer, Reaction::None);
    }

    #[test]
    fn timeline_keeps_one_thread_in_order() {
        let thread = ThreadId::between(&UserId::from("a"), &UserId::from("b"));
        let other = ThreadId::between(&UserId::from("a"), &UserId::from("c"));
        let messages = [
            message("m3", "b", Some(thread.clone()), 30),
            message("m1", "a", Some(thread.clone()), 10),
            message("lobby", "c", None, 15),
            message("m2", "a", Some(other), 20),
        ];

        let ids: Vec<_> = chat_timeline(&messages, Some(&thread))
            .into_iter()
            .map(|m| m.id.0)
            .collect();
        assert_eq!(ids, ["m1", "m3"]);

        let lobby = chat_timeline(&messages, None);
        assert_eq!(lobby.len(), 1);
        assert_eq!(lobby[0].id.as_str(), "lobby");
    }

    #[test]
    fn review_queue_has_one_entry_per_user() {
        let queue = pending_by_user(&[
            tx("t3", "u1", TransactionStatus::Pending, 30),
            tx("t1", "u1", TransactionStatus::Pending, 10),
            tx("t2", "u2", TransactionStatus::Pending, 5),
            tx("t4", "u3", TransactionStatus::Approved, 1),
        ]);
        let entries: Vec<_> = queue
            .iter()
            .map(|r| (r.transaction.id.as_str(), r.duplicates))
            .collect();
        assert_eq!(entries, [("t2", 0), ("t1", 1)]);
    }

    #[test]
    fn feed_cards_are_deterministic() {
        let roles = RoleTable::from_users(&[user("u1", Role::Premium)]);
        let mut p1 = post("p1", "u1");
        p1.likes = vec![UserId::from("me")];
        let posts = [p1, post("p2", "u2")];
        let comments = group_comments_by_post(&[
            comment("c1", "p1", "u2", 2),
            comment("c2", "p1", "u1", 1),
        ]);
        let me = UserId::from("me");

        let cards = feed_cards(&posts, &comments, &roles, Some(&me));
        assert_eq!(cards, feed_cards(&posts, &comments, &roles, Some(&me)));

        assert_eq!(cards.len(), 2);
        assert_eq!(cards[0].badge, Badge::Premium);
        assert_eq!(cards[0].reactions.viewer, Reaction::Liked);
        let first: Vec<_> = cards[0]
            .comments
            .iter()
            .map(|c| (c.item.id.as_str(), c.badge))
            .collect();
        assert_eq!(first, [("c2", Badge::Premium), ("c1", Badge::None)]);
        assert!(cards[1].comments.is_empty());
    }
}

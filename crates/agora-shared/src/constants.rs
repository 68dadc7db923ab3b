/// Application name
pub const APP_NAME: &str = "Agora";

/// Field holding the creation time (epoch milliseconds) on every document
pub const FIELD_CREATED_AT: &str = "createdAt";

/// Set-valued reaction fields on posts
pub const FIELD_LIKES: &str = "likes";
pub const FIELD_DISLIKES: &str = "dislikes";

/// Counter of comments attached to a post
pub const FIELD_COMMENTS_COUNT: &str = "commentsCount";

/// Foreign keys
pub const FIELD_POST_ID: &str = "postId";
pub const FIELD_CHAT_ID: &str = "chatId";
pub const FIELD_USER_ID: &str = "userId";
pub const FIELD_AUTHOR_ID: &str = "authorId";

pub const FIELD_STATUS: &str = "status";
pub const FIELD_ROLE: &str = "role";

/// Profile fields the owner may edit
pub const FIELD_DISPLAY_NAME: &str = "displayName";
pub const FIELD_PHOTO_URL: &str = "photoUrl";
pub const FIELD_BIO: &str = "bio";

/// Prefix of private 1:1 chat thread ids
pub const THREAD_PREFIX: &str = "dm";

/// Debounce window applied to toggle mutations, in milliseconds
pub const DEFAULT_DEBOUNCE_MS: u64 = 300;

/// Result-size bounds used by the feed and chat views
pub const DEFAULT_FEED_LIMIT: usize = 50;
pub const DEFAULT_CHAT_LIMIT: usize = 100;

/// Posts per feed page
pub const DEFAULT_PAGE_SIZE: usize = 10;

/// Reply shown when the text generation service cannot be reached
pub const FALLBACK_ASSISTANT_REPLY: &str =
    "The assistant is unavailable right now. Please try again later.";

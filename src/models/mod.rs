mod article;
mod batch;
mod bookmark;
mod source;
mod summary;

pub use article::{Article, ArticleDetail, CandidateItem, CanonicalItem, DuplicateRef, NewArticle, RelatedRef};
pub use batch::{BatchKind, BatchLabel};
pub use bookmark::{Bookmark, BookmarkEntry};
pub use source::SourceKind;
pub use summary::{SearchHit, Summary};

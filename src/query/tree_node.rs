use std::sync::Arc;

pub trait TreeNode: Sized {
    /// Get child nodes as `Arc<Self>` references instead of moving them.
    fn children(&self) -> Vec<Arc<Self>>;

    /// Create a new node with updated children as `Arc<Self>`.
    fn with_new_children(self: Arc<Self>, children: Vec<Arc<Self>>) -> Arc<Self>;
}

mod tree;

pub use tree::Tree;

//! Model components: backbone feature extractor, DINO projection head, and
//! the student/teacher pair with its EMA update.

pub mod backbone;
pub mod dino;
pub mod head;

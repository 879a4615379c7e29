//! Sprite module: maps the resolved state to visible frames

mod driver;

pub use driver::{AnimationTick, Sprite, SpriteDriver, SpriteFrame};

mod recursive_character_splitter;

pub use recursive_character_splitter::RecursiveCharacterSplitter;

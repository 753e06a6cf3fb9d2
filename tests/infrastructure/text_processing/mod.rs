mod recursive_character_splitter_test;

mod in_memory_repository_test;
mod pg_repository_test;

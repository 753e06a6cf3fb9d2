mod hashing_embedder_test;
mod streaming_client_test;

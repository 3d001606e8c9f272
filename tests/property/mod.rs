pub mod projector_proptest;

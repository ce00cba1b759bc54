pub mod box_filter;
pub mod canvas;
pub mod cluster_sampler;
pub mod layout_builder;
pub mod palette;
pub mod records;
pub mod tabular_store;
pub mod transforms;

//! Well-known cluster label keys read by the filter and score plugins.

/// Supplier (cloud vendor / operator) of the cluster.
pub const SUPPLIER_NAME: &str = "meshplace.io/supplier-name";

/// Container runtime offered by the cluster.
pub const RUNTIME_TYPE: &str = "meshplace.io/runtime-type";

/// Geographic location of the cluster.
pub const GEO_LOCATION: &str = "meshplace.io/geo-location";

/// `"true"` when the cluster is backed by virtual nodes.
pub const VIRTUAL_NODE: &str = "meshplace.io/virtual-node";

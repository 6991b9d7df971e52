//! Declarative routing model.
//!
//! A [`RoutingModel`] is built once per attempt and never mutated by the
//! engine. It holds registered transits, the arc-cost transit, named
//! dimensions and per-node cumul ranges. Node 0 is the depot every vehicle
//! starts from and returns to.

use std::fmt;

use crate::geometry::SquareMatrix;

/// Handle of a registered transit.
pub type TransitIndex = usize;

/// Handle of a declared dimension.
pub type DimensionIndex = usize;

/// Index of the depot node.
pub const DEPOT: usize = 0;

/// Per-arc quantity accumulated along a route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transit {
    /// Value depends on both endpoints.
    Arc(SquareMatrix),
    /// Value depends only on the node being left.
    Unary(Vec<i64>),
}

impl Transit {
    #[inline]
    pub fn value(&self, from: usize, to: usize) -> i64 {
        match self {
            Transit::Arc(matrix) => matrix.get(from, to),
            Transit::Unary(values) => values[from],
        }
    }

    fn len(&self) -> usize {
        match self {
            Transit::Arc(matrix) => matrix.size(),
            Transit::Unary(values) => values.len(),
        }
    }

    fn first_negative(&self) -> Option<(usize, usize, i64)> {
        match self {
            Transit::Arc(matrix) => (0..matrix.size()).find_map(|i| {
                matrix
                    .row(i)
                    .iter()
                    .position(|&v| v < 0)
                    .map(|j| (i, j, matrix.get(i, j)))
            }),
            Transit::Unary(values) => values
                .iter()
                .position(|&v| v < 0)
                .map(|i| (i, i, values[i])),
        }
    }
}

/// A named quantity tracked per vehicle along its route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dimension {
    pub name: String,
    pub transit: TransitIndex,
    /// Maximum waiting that may be inserted at a node.
    pub slack_max: i64,
    /// Upper bound of the cumul for each vehicle.
    pub vehicle_capacities: Vec<i64>,
    /// Forces the cumul at the start of every route to zero.
    pub fix_start_cumul_to_zero: bool,
    /// Allowed cumul range `[lo, hi]` per node.
    pub cumul_ranges: Vec<(i64, i64)>,
}

impl Dimension {
    #[inline]
    pub fn range(&self, node: usize) -> (i64, i64) {
        self.cumul_ranges[node]
    }
}

/// Structural problem detected before search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    NoVehicles,
    NoNodes,
    MissingArcCost,
    UnknownTransit(TransitIndex),
    UnknownDimension(String),
    DuplicateDimension(String),
    TransitSizeMismatch {
        transit: TransitIndex,
        expected: usize,
        actual: usize,
    },
    NegativeTransit {
        transit: TransitIndex,
        from: usize,
        to: usize,
        value: i64,
    },
    NegativeSlack {
        dimension: String,
        value: i64,
    },
    CapacityCountMismatch {
        dimension: String,
        expected: usize,
        actual: usize,
    },
    NegativeCapacity {
        dimension: String,
        vehicle: usize,
        value: i64,
    },
    NodeOutOfRange {
        node: usize,
        num_nodes: usize,
    },
    EmptyCumulRange {
        dimension: String,
        node: usize,
        lo: i64,
        hi: i64,
    },
    InvalidWarmStart(String),
    /// Valid, but outside what the backend can express.
    Unsupported(String),
}

impl fmt::Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::NoVehicles => write!(f, "Model has no vehicles"),
            ModelError::NoNodes => write!(f, "Model has no nodes"),
            ModelError::MissingArcCost => write!(f, "No arc cost evaluator registered"),
            ModelError::UnknownTransit(t) => write!(f, "Unknown transit {}", t),
            ModelError::UnknownDimension(name) => write!(f, "Unknown dimension '{}'", name),
            ModelError::DuplicateDimension(name) => {
                write!(f, "Dimension '{}' declared twice", name)
            }
            ModelError::TransitSizeMismatch {
                transit,
                expected,
                actual,
            } => write!(
                f,
                "Transit {} covers {} nodes, model has {}",
                transit, actual, expected
            ),
            ModelError::NegativeTransit {
                transit,
                from,
                to,
                value,
            } => write!(
                f,
                "Transit {} has negative value {} on arc {} -> {}",
                transit, value, from, to
            ),
            ModelError::NegativeSlack { dimension, value } => {
                write!(f, "Dimension '{}' has negative slack {}", dimension, value)
            }
            ModelError::CapacityCountMismatch {
                dimension,
                expected,
                actual,
            } => write!(
                f,
                "Dimension '{}' has {} vehicle capacities, expected {}",
                dimension, actual, expected
            ),
            ModelError::NegativeCapacity {
                dimension,
                vehicle,
                value,
            } => write!(
                f,
                "Dimension '{}' has negative capacity {} for vehicle {}",
                dimension, value, vehicle
            ),
            ModelError::NodeOutOfRange { node, num_nodes } => {
                write!(f, "Node {} out of range (model has {} nodes)", node, num_nodes)
            }
            ModelError::EmptyCumulRange {
                dimension,
                node,
                lo,
                hi,
            } => write!(
                f,
                "Dimension '{}' has empty range [{}, {}] at node {}",
                dimension, lo, hi, node
            ),
            ModelError::InvalidWarmStart(msg) => write!(f, "Invalid warm start: {}", msg),
            ModelError::Unsupported(msg) => write!(f, "Unsupported model: {}", msg),
        }
    }
}

impl std::error::Error for ModelError {}

/// A capacitated vehicle routing model with named dimensions.
///
/// # Examples
///
/// ```
/// use molok_planner::engine::RoutingModel;
/// use molok_planner::geometry::SquareMatrix;
///
/// let time = SquareMatrix::from_rows(vec![
///     vec![0, 5, 7],
///     vec![6, 0, 3],
///     vec![8, 3, 0],
/// ]).unwrap();
///
/// let mut model = RoutingModel::new(3, 1);
/// let t = model.register_transit_matrix(time);
/// model.set_arc_cost_evaluator(t);
/// let dim = model.add_dimension(t, 0, 100, true, "Time").unwrap();
/// model.set_cumul_range(dim, 1, 0, 10).unwrap();
///
/// assert!(model.validate().is_ok());
/// assert_eq!(model.dimension_index("Time"), Some(dim));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingModel {
    num_nodes: usize,
    num_vehicles: usize,
    transits: Vec<Transit>,
    arc_cost: Option<TransitIndex>,
    dimensions: Vec<Dimension>,
}

impl RoutingModel {
    /// Creates an empty model. Node 0 is the depot.
    pub fn new(num_nodes: usize, num_vehicles: usize) -> Self {
        Self {
            num_nodes,
            num_vehicles,
            transits: Vec::new(),
            arc_cost: None,
            dimensions: Vec::new(),
        }
    }

    #[inline]
    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    #[inline]
    pub fn num_vehicles(&self) -> usize {
        self.num_vehicles
    }

    pub fn register_transit_matrix(&mut self, matrix: SquareMatrix) -> TransitIndex {
        self.transits.push(Transit::Arc(matrix));
        self.transits.len() - 1
    }

    pub fn register_unary_transit(&mut self, values: Vec<i64>) -> TransitIndex {
        self.transits.push(Transit::Unary(values));
        self.transits.len() - 1
    }

    /// Uses `transit` as the cost of travelling each arc.
    pub fn set_arc_cost_evaluator(&mut self, transit: TransitIndex) {
        self.arc_cost = Some(transit);
    }

    /// Declares a dimension with the same capacity for every vehicle.
    pub fn add_dimension(
        &mut self,
        transit: TransitIndex,
        slack_max: i64,
        capacity: i64,
        fix_start_cumul_to_zero: bool,
        name: &str,
    ) -> Result<DimensionIndex, ModelError> {
        let capacities = vec![capacity; self.num_vehicles];
        self.add_dimension_with_vehicle_capacity(
            transit,
            slack_max,
            capacities,
            fix_start_cumul_to_zero,
            name,
        )
    }

    /// Declares a dimension with one capacity per vehicle.
    pub fn add_dimension_with_vehicle_capacity(
        &mut self,
        transit: TransitIndex,
        slack_max: i64,
        vehicle_capacities: Vec<i64>,
        fix_start_cumul_to_zero: bool,
        name: &str,
    ) -> Result<DimensionIndex, ModelError> {
        if transit >= self.transits.len() {
            return Err(ModelError::UnknownTransit(transit));
        }
        if self.dimension_index(name).is_some() {
            return Err(ModelError::DuplicateDimension(name.to_string()));
        }
        self.dimensions.push(Dimension {
            name: name.to_string(),
            transit,
            slack_max,
            vehicle_capacities,
            fix_start_cumul_to_zero,
            cumul_ranges: vec![(0, i64::MAX); self.num_nodes],
        });
        Ok(self.dimensions.len() - 1)
    }

    /// Restricts the cumul of `dimension` at `node` to `[lo, hi]`.
    ///
    /// The depot's range applies to both the start and the end of every route.
    pub fn set_cumul_range(
        &mut self,
        dimension: DimensionIndex,
        node: usize,
        lo: i64,
        hi: i64,
    ) -> Result<(), ModelError> {
        let num_nodes = self.num_nodes;
        let dim = self
            .dimensions
            .get_mut(dimension)
            .ok_or_else(|| ModelError::UnknownDimension(format!("#{}", dimension)))?;
        let slot = dim
            .cumul_ranges
            .get_mut(node)
            .ok_or(ModelError::NodeOutOfRange { node, num_nodes })?;
        *slot = (lo, hi);
        Ok(())
    }

    pub fn dimension_index(&self, name: &str) -> Option<DimensionIndex> {
        self.dimensions.iter().position(|d| d.name == name)
    }

    #[inline]
    pub fn dimensions(&self) -> &[Dimension] {
        &self.dimensions
    }

    #[inline]
    pub fn dimension(&self, index: DimensionIndex) -> &Dimension {
        &self.dimensions[index]
    }

    #[inline]
    pub fn transit(&self, index: TransitIndex) -> &Transit {
        &self.transits[index]
    }

    #[inline]
    pub fn arc_cost_transit(&self) -> Option<TransitIndex> {
        self.arc_cost
    }

    /// Cost of travelling `from -> to`. Zero if no cost is registered.
    #[inline]
    pub fn arc_cost(&self, from: usize, to: usize) -> i64 {
        self.arc_cost
            .map(|t| self.transits[t].value(from, to))
            .unwrap_or(0)
    }

    /// Checks the model for structural errors.
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.num_nodes == 0 {
            return Err(ModelError::NoNodes);
        }
        if self.num_vehicles == 0 {
            return Err(ModelError::NoVehicles);
        }
        match self.arc_cost {
            None => return Err(ModelError::MissingArcCost),
            Some(t) if t >= self.transits.len() => return Err(ModelError::UnknownTransit(t)),
            Some(_) => {}
        }

        for (index, transit) in self.transits.iter().enumerate() {
            if transit.len() != self.num_nodes {
                return Err(ModelError::TransitSizeMismatch {
                    transit: index,
                    expected: self.num_nodes,
                    actual: transit.len(),
                });
            }
            if let Some((from, to, value)) = transit.first_negative() {
                return Err(ModelError::NegativeTransit {
                    transit: index,
                    from,
                    to,
                    value,
                });
            }
        }

        for dim in &self.dimensions {
            if dim.slack_max < 0 {
                return Err(ModelError::NegativeSlack {
                    dimension: dim.name.clone(),
                    value: dim.slack_max,
                });
            }
            if dim.vehicle_capacities.len() != self.num_vehicles {
                return Err(ModelError::CapacityCountMismatch {
                    dimension: dim.name.clone(),
                    expected: self.num_vehicles,
                    actual: dim.vehicle_capacities.len(),
                });
            }
            if let Some((vehicle, &value)) = dim
                .vehicle_capacities
                .iter()
                .enumerate()
                .find(|&(_, &c)| c < 0)
            {
                return Err(ModelError::NegativeCapacity {
                    dimension: dim.name.clone(),
                    vehicle,
                    value,
                });
            }
            if let Some((node, &(lo, hi))) = dim
                .cumul_ranges
                .iter()
                .enumerate()
                .find(|&(_, &(lo, hi))| lo > hi)
            {
                return Err(ModelError::EmptyCumulRange {
                    dimension: dim.name.clone(),
                    node,
                    lo,
                    hi,
                });
            }
        }
        Ok(())
    }

    /// Checks that warm-start routes only name customer nodes, each at most once.
    pub fn validate_routes(&self, routes: &[Vec<usize>]) -> Result<(), ModelError> {
        if routes.len() > self.num_vehicles {
            return Err(ModelError::InvalidWarmStart(format!(
                "{} routes for {} vehicles",
                routes.len(),
                self.num_vehicles
            )));
        }
        let mut seen = vec![false; self.num_nodes];
        for &node in routes.iter().flatten() {
            if node == DEPOT || node >= self.num_nodes {
                return Err(ModelError::InvalidWarmStart(format!(
                    "node {} is not a customer node",
                    node
                )));
            }
            if std::mem::replace(&mut seen[node], true) {
                return Err(ModelError::InvalidWarmStart(format!(
                    "node {} appears twice",
                    node
                )));
            }
        }
        Ok(())
    }
}

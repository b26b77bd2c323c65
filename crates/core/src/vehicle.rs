use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A vehicle as the sales agent describes it to the customer.
///
/// Only `brand`, `model`, `category` and `price` are required. Any field the
/// engine sends that is not modelled here is kept in `extra` so the UI layer
/// receives the descriptor exactly as the engine produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct VehicleDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub brand: String,
    pub model: String,
    /// Vehicle group, e.g. "Premium Sedan".
    #[serde(alias = "groupType")]
    pub category: String,
    /// Daily price in EUR.
    pub price: f64,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, alias = "fuelType", skip_serializing_if = "Option::is_none")]
    pub fuel_type: Option<String>,
    #[serde(
        default,
        alias = "transmissionType",
        skip_serializing_if = "Option::is_none"
    )]
    pub transmission_type: Option<String>,
    #[serde(flatten)]
    #[schemars(skip)]
    pub extra: Map<String, Value>,
}

impl VehicleDescriptor {
    pub fn new(brand: &str, model: &str, category: &str, price: f64) -> Self {
        Self {
            id: None,
            brand: brand.to_string(),
            model: model.to_string(),
            category: category.to_string(),
            price,
            features: Vec::new(),
            image: None,
            fuel_type: None,
            transmission_type: None,
            extra: Map::new(),
        }
    }

    pub fn with_features(mut self, features: &[&str]) -> Self {
        self.features = features.iter().map(|f| f.to_string()).collect();
        self
    }

    /// "BMW 5 Series" style display name.
    pub fn display_name(&self) -> String {
        format!("{} {}", self.brand, self.model)
    }
}

/// The ordered recommendation list handed to the UI once a conversation completes.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct Recommendations(Vec<VehicleDescriptor>);

impl Recommendations {
    pub fn new(vehicles: Vec<VehicleDescriptor>) -> Self {
        Self(vehicles)
    }

    pub fn vehicles(&self) -> &[VehicleDescriptor] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parses a JSON array of vehicle descriptors.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// The list the demo shows when the engine never names concrete vehicles.
    pub fn demo_fallback() -> Self {
        let bmw = VehicleDescriptor::new("BMW", "5 Series", "Premium Sedan", 89.0)
            .with_features(&["Leather Interior", "Navigation", "Premium Sound"]);
        let mercedes = VehicleDescriptor::new("Mercedes", "E-Class", "Luxury Sedan", 95.0)
            .with_features(&["Massage Seats", "360° Camera", "Adaptive Cruise"]);
        Self(vec![
            demo_entry(bmw, "1", "photo-1555215695-3004980ad54e"),
            demo_entry(mercedes, "2", "photo-1618843479313-40f8afb4b4d8"),
        ])
    }
}

fn demo_entry(mut vehicle: VehicleDescriptor, id: &str, photo: &str) -> VehicleDescriptor {
    vehicle.id = Some(id.to_string());
    vehicle.image = Some(format!("https://images.unsplash.com/{photo}?w=800"));
    let name = vehicle.display_name();
    vehicle.extra.insert("name".to_string(), Value::String(name));
    vehicle.extra.insert("recommended".to_string(), Value::Bool(true));
    vehicle
}

//! Client-Tool Dispatcher
//!
//! The upstream engine may ask the client to perform a side effect, such as
//! showing a vehicle card, mid-conversation. The engine blocks until it
//! receives a textual result, so every invocation produces a `ToolOutcome`,
//! including invocations of tools that do not exist.

use crate::error::UnknownToolError;
use crate::vehicle::{Recommendations, VehicleDescriptor};
use async_trait::async_trait;
use schemars::{JsonSchema, generate::SchemaSettings};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::str::FromStr;
use tracing::{info, warn};

/// A named operation requested by the upstream engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolInvocation {
    /// Correlates the result with the request on the wire.
    pub call_id: String,
    pub name: String,
    pub arguments: Value,
}

/// The result fed back to the engine as the tool's output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolOutcome {
    pub call_id: String,
    pub output: String,
    pub is_error: bool,
}

impl ToolOutcome {
    fn ok(call_id: &str, output: impl Into<String>) -> Self {
        Self {
            call_id: call_id.to_string(),
            output: output.into(),
            is_error: false,
        }
    }

    fn error(call_id: &str, output: impl Into<String>) -> Self {
        Self {
            call_id: call_id.to_string(),
            output: output.into(),
            is_error: true,
        }
    }
}

/// The closed set of tools the client implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientTool {
    ShowVehicle,
    DismissVehicle,
    RedirectToConfirmation,
    /// Distinguished tool the completion detector keys off.
    PresentRecommendations,
}

impl ClientTool {
    pub const ALL: [ClientTool; 4] = [
        ClientTool::ShowVehicle,
        ClientTool::DismissVehicle,
        ClientTool::RedirectToConfirmation,
        ClientTool::PresentRecommendations,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::ShowVehicle => "show_vehicle",
            Self::DismissVehicle => "dismiss_vehicle",
            Self::RedirectToConfirmation => "redirect_to_confirmation",
            Self::PresentRecommendations => "present_recommendations",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::ShowVehicle => {
                "Show a vehicle card to the customer while you talk about it."
            }
            Self::DismissVehicle => "Hide the vehicle card that is currently shown.",
            Self::RedirectToConfirmation => {
                "Take the customer to the booking confirmation screen once they have chosen."
            }
            Self::PresentRecommendations => {
                "Present your final vehicle recommendations and end the conversation."
            }
        }
    }

    /// JSON Schema of the tool's arguments.
    pub fn parameters(self) -> Value {
        match self {
            Self::ShowVehicle => schema_value::<ShowVehicleArgs>(),
            Self::PresentRecommendations => schema_value::<PresentRecommendationsArgs>(),
            Self::DismissVehicle | Self::RedirectToConfirmation => {
                json!({ "type": "object", "properties": {} })
            }
        }
    }
}

impl FromStr for ClientTool {
    type Err = UnknownToolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|tool| tool.name() == s)
            .ok_or_else(|| UnknownToolError(s.to_string()))
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ShowVehicleArgs {
    /// The vehicle to display.
    pub vehicle: VehicleDescriptor,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct PresentRecommendationsArgs {
    /// The vehicles to recommend, best match first.
    pub recommendations: Recommendations,
}

fn schema_value<T: JsonSchema>() -> Value {
    let schema = SchemaSettings::draft07()
        .with(|s| {
            s.inline_subschemas = true;
            s.meta_schema = None;
        })
        .into_generator()
        .into_root_schema_for::<T>();
    serde_json::to_value(schema).unwrap_or_else(|_| json!({ "type": "object" }))
}

/// The local side effects behind the client tools.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ToolEffects: Send + Sync {
    /// Surfaces a vehicle descriptor to the UI layer.
    async fn show_vehicle(&self, vehicle: VehicleDescriptor) -> anyhow::Result<()>;
    async fn dismiss_vehicle(&self) -> anyhow::Result<()>;
    async fn redirect_to_confirmation(&self) -> anyhow::Result<()>;
}

pub struct ToolDispatcher<E> {
    effects: E,
}

impl<E: ToolEffects> ToolDispatcher<E> {
    pub fn new(effects: E) -> Self {
        Self { effects }
    }

    /// Executes one invocation and returns the text the engine is waiting for.
    pub async fn dispatch(&self, call: &ToolInvocation) -> ToolOutcome {
        let tool = match call.name.parse::<ClientTool>() {
            Ok(tool) => tool,
            Err(e) => {
                warn!(tool = %call.name, "Engine invoked an unregistered client tool");
                return ToolOutcome::error(&call.call_id, format!("Error: {}", e));
            }
        };
        info!(tool = tool.name(), call_id = %call.call_id, "Executing client tool");

        match tool {
            ClientTool::ShowVehicle => {
                let args: ShowVehicleArgs = match serde_json::from_value(call.arguments.clone()) {
                    Ok(args) => args,
                    Err(e) => {
                        return ToolOutcome::error(
                            &call.call_id,
                            format!("Error: invalid arguments for show_vehicle: {}", e),
                        );
                    }
                };
                let name = args.vehicle.display_name();
                match self.effects.show_vehicle(args.vehicle).await {
                    Ok(()) => ToolOutcome::ok(
                        &call.call_id,
                        format!("Vehicle {} is now shown to the customer.", name),
                    ),
                    Err(e) => effect_failed(&call.call_id, tool, e),
                }
            }
            ClientTool::DismissVehicle => match self.effects.dismiss_vehicle().await {
                Ok(()) => ToolOutcome::ok(&call.call_id, "Vehicle hidden."),
                Err(e) => effect_failed(&call.call_id, tool, e),
            },
            ClientTool::RedirectToConfirmation => {
                match self.effects.redirect_to_confirmation().await {
                    Ok(()) => ToolOutcome::ok(
                        &call.call_id,
                        "Customer redirected to the confirmation screen.",
                    ),
                    Err(e) => effect_failed(&call.call_id, tool, e),
                }
            }
            ClientTool::PresentRecommendations => {
                ToolOutcome::ok(&call.call_id, "Recommendations presented to the customer.")
            }
        }
    }
}

fn effect_failed(call_id: &str, tool: ClientTool, err: anyhow::Error) -> ToolOutcome {
    warn!(tool = tool.name(), error = %err, "Client tool effect failed");
    ToolOutcome::error(call_id, format!("Error: {} failed: {}", tool.name(), err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::eq;

    fn invocation(name: &str, arguments: Value) -> ToolInvocation {
        ToolInvocation {
            call_id: "call_1".to_string(),
            name: name.to_string(),
            arguments,
        }
    }

    #[tokio::test]
    async fn test_show_vehicle_surfaces_descriptor_unchanged() {
        let vehicle_json = json!({
            "brand": "BMW",
            "model": "X5",
            "category": "Premium SUV",
            "price": 129.0,
            "features": ["Panorama Roof"],
            "image": "https://example.com/x5.png"
        });
        let expected: VehicleDescriptor = serde_json::from_value(vehicle_json.clone()).unwrap();

        let mut effects = MockToolEffects::new();
        effects
            .expect_show_vehicle()
            .with(eq(expected))
            .times(1)
            .returning(|_| Ok(()));

        let dispatcher = ToolDispatcher::new(effects);
        let outcome = dispatcher
            .dispatch(&invocation("show_vehicle", json!({ "vehicle": vehicle_json })))
            .await;

        assert!(!outcome.is_error);
        assert_eq!(outcome.call_id, "call_1");
        assert!(outcome.output.contains("BMW X5"));
    }

    #[tokio::test]
    async fn test_dismiss_and_redirect_confirm() {
        let mut effects = MockToolEffects::new();
        effects.expect_dismiss_vehicle().times(1).returning(|| Ok(()));
        effects
            .expect_redirect_to_confirmation()
            .times(1)
            .returning(|| Ok(()));
        let dispatcher = ToolDispatcher::new(effects);

        let dismissed = dispatcher
            .dispatch(&invocation("dismiss_vehicle", json!({})))
            .await;
        let redirected = dispatcher
            .dispatch(&invocation("redirect_to_confirmation", Value::Null))
            .await;

        assert!(!dismissed.is_error && !dismissed.output.is_empty());
        assert!(!redirected.is_error && !redirected.output.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_tool_returns_error_text() {
        let effects = MockToolEffects::new();
        let dispatcher = ToolDispatcher::new(effects);

        let outcome = dispatcher.dispatch(&invocation("foo", json!({}))).await;

        assert!(outcome.is_error);
        assert_eq!(outcome.output, "Error: Unknown tool: foo");
    }

    #[tokio::test]
    async fn test_invalid_arguments_do_not_reach_effects() {
        let mut effects = MockToolEffects::new();
        effects.expect_show_vehicle().never();
        let dispatcher = ToolDispatcher::new(effects);

        let outcome = dispatcher
            .dispatch(&invocation("show_vehicle", json!({ "vehicle": { "brand": "BMW" } })))
            .await;

        assert!(outcome.is_error);
        assert!(outcome.output.contains("invalid arguments"));
    }

    #[tokio::test]
    async fn test_failed_effect_is_reported_as_error() {
        let mut effects = MockToolEffects::new();
        effects
            .expect_dismiss_vehicle()
            .returning(|| Err(anyhow::anyhow!("client gone")));
        let dispatcher = ToolDispatcher::new(effects);

        let outcome = dispatcher
            .dispatch(&invocation("dismiss_vehicle", json!({})))
            .await;

        assert!(outcome.is_error);
        assert!(outcome.output.contains("client gone"));
    }

    #[tokio::test]
    async fn test_present_recommendations_is_acknowledged() {
        let dispatcher = ToolDispatcher::new(MockToolEffects::new());
        let outcome = dispatcher
            .dispatch(&invocation("present_recommendations", json!({ "recommendations": [] })))
            .await;
        assert!(!outcome.is_error);
    }

    #[test]
    fn test_tool_names_round_trip() {
        for tool in ClientTool::ALL {
            assert_eq!(tool.name().parse::<ClientTool>().unwrap(), tool);
        }
        assert!("show-vehicle".parse::<ClientTool>().is_err());
    }

    #[test]
    fn test_show_vehicle_schema_requires_vehicle() {
        let schema = ClientTool::ShowVehicle.parameters();
        assert_eq!(schema["type"], "object");
        assert!(schema.get("$schema").is_none());
        let required = schema["required"].as_array().unwrap();
        assert!(required.contains(&json!("vehicle")));
        assert!(schema["properties"]["vehicle"]["properties"]["brand"].is_object());
    }
}

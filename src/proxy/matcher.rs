//! Entity Matcher
//!
//! Filters candidate entities with the AND-combined expressions of a
//! [`ProxyRequests`]. Each expression is evaluated with the entity's
//! [`AttributeView`] bound as `entity`.
//!
//! ```text
//! for entity in candidates:
//!   view = AttributeView(entity)
//!   for expression in entity_attributes:
//!     Ok(true)          → next expression
//!     Ok(false)         → skip entity
//!     Err(Syntax)       → log error, skip entity
//!     Err(Evaluation)   → log debug, skip entity
//!   keep entity
//! ```
//!
//! A failure never leaks past the entity it happened on.

use tracing::{debug, error, trace};

use crate::check::ProxyRequests;
use crate::entity::Entity;
use crate::expression::{Bindings, BooleanExpressionEvaluator, ExpressionError};

use super::attributes::AttributeView;

/// Name under which the attribute view is bound during evaluation
pub const ENTITY_BINDING: &str = "entity";

/// Return the entities for which every expression holds, in input order
pub fn match_entities<'a>(
    entities: &'a [Entity],
    proxy_requests: &ProxyRequests,
    evaluator: &dyn BooleanExpressionEvaluator,
) -> Vec<&'a Entity> {
    entities
        .iter()
        .filter(|entity| entity_matches(entity, &proxy_requests.entity_attributes, evaluator))
        .collect()
}

/// Whether `entity` satisfies all `expressions` (trivially true when empty)
pub fn entity_matches(
    entity: &Entity,
    expressions: &[String],
    evaluator: &dyn BooleanExpressionEvaluator,
) -> bool {
    if expressions.is_empty() {
        return true;
    }

    let view = AttributeView::from_entity(entity);
    let bindings = Bindings::new().with(ENTITY_BINDING, view.as_value());

    for expression in expressions {
        match evaluator.evaluate(expression, &bindings) {
            Ok(true) => {
                trace!(
                    entity = %entity.name,
                    namespace = %entity.namespace,
                    %expression,
                    "expression matches entity"
                );
            }
            Ok(false) => {
                trace!(
                    entity = %entity.name,
                    namespace = %entity.namespace,
                    %expression,
                    "expression does not match entity"
                );
                return false;
            }
            Err(e @ ExpressionError::Syntax(_)) => {
                error!(
                    entity = %entity.name,
                    namespace = %entity.namespace,
                    %expression,
                    "syntax error: {e}"
                );
                return false;
            }
            Err(e @ ExpressionError::Evaluation(_)) => {
                debug!(
                    entity = %entity.name,
                    namespace = %entity.namespace,
                    %expression,
                    "skipping expression: {e}"
                );
                return false;
            }
        }
    }

    true
}

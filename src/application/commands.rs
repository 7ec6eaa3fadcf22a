//! Execution of operator commands against an assembled [`CacheStack`].

use std::{convert::Infallible, path::Path};

use serde_json::{Value, json};
use tracing::info;

use crate::{
    cache::{DomainKey, InvalidationEvent, InvalidationMetadata, RestaurantId},
    config::{
        ClearArgs, Command, GetArgs, InvalidateArgs, OptimizeArgs, PreloadArgs, SetArgs,
    },
};

use super::{context::CacheStack, error::AppError};

/// Fixture file a command needs as its data source, if any.
pub fn fixtures_path(command: &Command) -> Option<&Path> {
    match command {
        Command::Preload(args) => Some(args.fixtures.as_path()),
        Command::Optimize(args) => args.fixtures.as_deref(),
        _ => None,
    }
}

/// Run one command and return its result as JSON.
pub async fn execute(command: &Command, stack: &CacheStack) -> Result<Value, AppError> {
    match command {
        Command::Health => health(stack).await,
        Command::Optimize(args) => optimize(stack, args).await,
        Command::Invalidate(args) => invalidate(stack, args),
        Command::Clear(args) => clear(stack, args),
        Command::Get(args) => get(stack, args),
        Command::Set(args) => set(stack, args).await,
        Command::Preload(args) => preload(stack, args).await,
    }
}

async fn health(stack: &CacheStack) -> Result<Value, AppError> {
    let health = stack.manager.cache_health().await;
    Ok(json!({
        "health": to_value(&health)?,
        "metrics": to_value(&stack.coordinator.metrics())?,
    }))
}

async fn optimize(stack: &CacheStack, args: &OptimizeArgs) -> Result<Value, AppError> {
    let restaurant = args.restaurant.as_deref().map(RestaurantId::new);

    let report = if args.full {
        let restaurant = restaurant
            .as_ref()
            .ok_or_else(|| AppError::validation("--full requires --restaurant"))?;
        stack.manager.force_full_optimization(restaurant).await?
    } else {
        stack
            .manager
            .perform_smart_optimization(restaurant.as_ref())
            .await?
    };

    info!(
        run_id = %report.run_id,
        skipped = report.skipped,
        cleared_entries = report.cleared_entries,
        "Optimize command finished"
    );
    to_value(&report)
}

fn invalidate(stack: &CacheStack, args: &InvalidateArgs) -> Result<Value, AppError> {
    let event = args
        .event
        .parse::<InvalidationEvent>()
        .unwrap_or_else(|never: Infallible| match never {});
    let restaurant = RestaurantId::new(args.restaurant.as_str());

    let metadata = (args.item_id.is_some() || args.category_id.is_some()).then(|| {
        InvalidationMetadata {
            item_id: args.item_id.clone(),
            category_id: args.category_id.clone(),
        }
    });

    let outcome = stack
        .coordinator
        .invalidate(&event, &restaurant, metadata.as_ref());
    to_value(&outcome)
}

fn clear(stack: &CacheStack, args: &ClearArgs) -> Result<Value, AppError> {
    let restaurant = RestaurantId::new(args.restaurant.as_str());
    let key = args.key.as_deref().map(DomainKey::parse);
    let removed = stack.service.clear(&restaurant, key.as_ref());
    Ok(json!({
        "restaurant": restaurant,
        "key": args.key,
        "removed": removed,
    }))
}

fn get(stack: &CacheStack, args: &GetArgs) -> Result<Value, AppError> {
    let restaurant = RestaurantId::new(args.restaurant.as_str());
    let key = DomainKey::parse(&args.key);
    let value: Option<Value> = stack.coordinator.get(&key, &restaurant, args.context);
    Ok(json!({
        "restaurant": restaurant,
        "key": key.as_str(),
        "context": args.context,
        "hit": value.is_some(),
        "value": value,
    }))
}

async fn set(stack: &CacheStack, args: &SetArgs) -> Result<Value, AppError> {
    let value: Value = serde_json::from_str(&args.value)
        .map_err(|err| AppError::validation(format!("--value is not valid JSON: {err}")))?;
    let restaurant = RestaurantId::new(args.restaurant.as_str());
    let key = DomainKey::parse(&args.key);

    let written = stack
        .coordinator
        .set(&key, &value, &restaurant, args.context)
        .await;
    Ok(json!({
        "restaurant": restaurant,
        "key": key.as_str(),
        "context": args.context,
        "written": written,
    }))
}

async fn preload(stack: &CacheStack, args: &PreloadArgs) -> Result<Value, AppError> {
    let preloader = stack
        .preloader
        .as_ref()
        .ok_or_else(|| AppError::unexpected("preload requires a data source"))?;
    let report = preloader.preload_kiosk(&args.slug).await;
    if !report.skipped && report.restaurant.is_none() {
        return Err(AppError::not_found(format!("restaurant `{}`", args.slug)));
    }
    to_value(&report)
}

fn to_value<T: serde::Serialize>(value: &T) -> Result<Value, AppError> {
    serde_json::to_value(value)
        .map_err(|err| AppError::unexpected(format!("failed to serialize output: {err}")))
}

use std::sync::Arc;
use warp::Filter;
use warp::http::StatusCode;

use crate::game_manager::GameManager;
use crate::websocket::ConnectionManager;
use geoguess_core::is_valid_join_code;
use geoguess_types::{GameError, GameSummary};

pub mod config;
pub mod game_manager;
pub mod round_tasks;
pub mod websocket;

pub fn create_routes(
    connection_manager: Arc<ConnectionManager>,
    game_manager: Arc<GameManager>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    let connection_manager_filter = warp::any().map({
        let connection_manager = connection_manager.clone();
        move || connection_manager.clone()
    });

    let game_manager_filter = warp::any().map({
        let game_manager = game_manager.clone();
        move || game_manager.clone()
    });

    let websocket = warp::path("ws")
        .and(warp::ws())
        .and(connection_manager_filter)
        .and(game_manager_filter.clone())
        .map(|ws: warp::ws::Ws, conn_mgr, game_mgr| {
            ws.on_upgrade(move |socket| websocket::handle_connection(socket, conn_mgr, game_mgr))
        });

    let health = warp::path("health")
        .and(warp::get())
        .map(|| warp::reply::with_status("OK", StatusCode::OK));

    // Lobby lookup before joining by code
    let game_summary = warp::path!("games" / String)
        .and(warp::get())
        .and(game_manager_filter)
        .and_then(handle_game_summary_request);

    let cors = warp::cors()
        .allow_any_origin()
        .allow_headers(vec!["content-type"])
        .allow_methods(vec!["GET"]);

    websocket
        .or(health)
        .or(game_summary)
        .with(cors)
        .with(warp::log("geoguess"))
}

fn error_reply(message: &str, status: StatusCode) -> warp::reply::WithStatus<warp::reply::Json> {
    warp::reply::with_status(
        warp::reply::json(&serde_json::json!({ "error": message })),
        status,
    )
}

async fn handle_game_summary_request(
    code: String,
    game_manager: Arc<GameManager>,
) -> Result<impl warp::Reply, warp::Rejection> {
    if !is_valid_join_code(&code) {
        return Ok(error_reply(
            "Invalid game code format",
            StatusCode::BAD_REQUEST,
        ));
    }

    match game_manager.get_game_by_code(&code).await {
        Ok(game) => Ok(warp::reply::with_status(
            warp::reply::json(&GameSummary::from(&game)),
            StatusCode::OK,
        )),
        Err(GameError::NotFound { .. }) => Ok(error_reply("Game not found", StatusCode::NOT_FOUND)),
        Err(err) => {
            tracing::error!("Failed to load game {}: {}", code, err);
            Ok(error_reply(
                "Failed to load game",
                StatusCode::INTERNAL_SERVER_ERROR,
            ))
        }
    }
}

use actix_web::dev::Server;
use actix_web::{web, App, HttpServer};
use std::net::TcpListener;
use std::sync::Arc;

use crate::logger::RequestLogger;
use crate::middleware::AccessTokenGuard;
use crate::routes::{current_user, health_check, login, logout, logout_all, refresh, register};
use crate::session::SessionManager;

pub fn run(listener: TcpListener, session: Arc<SessionManager>) -> Result<Server, std::io::Error> {
    let session_data = web::Data::from(session.clone());

    let server = HttpServer::new(move || {
        App::new()
            .wrap(RequestLogger)
            .app_data(session_data.clone())
            .route("/health_check", web::get().to(health_check))
            .service(
                web::scope("/auth")
                    .route("/register", web::post().to(register))
                    .route("/login", web::post().to(login))
                    .route("/refresh", web::post().to(refresh))
                    .route("/logout", web::post().to(logout))
                    .route("/logout/all", web::post().to(logout_all)),
            )
            .service(
                web::scope("/account")
                    .wrap(AccessTokenGuard::new(session.clone()))
                    .route("/me", web::get().to(current_user)),
            )
    })
    .listen(listener)?
    .run();

    Ok(server)
}

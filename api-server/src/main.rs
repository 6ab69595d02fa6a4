#[rocket::launch]
fn rocket() -> _ {
    let rocket = member_api::rocket();
    log::info!("Starting Member API Server");
    rocket
}

use hearth_testing::prelude::*;

struct Whoami {
    principal: i64,
    flags: u64,
}
impl Row for Whoami {
    const LAYOUT: Layout = Layout {
        name: "Whoami",
        fields: &["principal", "flags"],
        key: 0,
    };
    fn cells(&self) -> Vec<Value> {
        vec![self.principal.into(), self.flags.into()]
    }
}

fn routes(routes: &mut Routes) {
    routes
        .add(
            "/login",
            Route::public(routing::handler(|ctx: Context| async move {
                let user: i64 = ctx.request().parameter("user")?;
                let flags = ctx.request().optional_parameter("flags")?.unwrap_or(0);
                ctx.authenticate(user, flags)?;
                let mut result = ResultBuilder::new();
                result.add_success("logged in");
                Ok::<_, Error>(result.into())
            })),
        )
        .add(
            "/logout",
            Route::new(
                routing::handler(|ctx: Context| async move {
                    ctx.logout()?;
                    let mut result = ResultBuilder::new();
                    result.add_success("logged out");
                    Ok::<_, Error>(result.into())
                }),
                Access::Session,
            ),
        )
        .add(
            "/whoami",
            Route::new(
                routing::handler(|ctx: Context| async move {
                    let session = ctx.session();
                    let mut result = ResultBuilder::new();
                    result.add_struct(&Whoami {
                        principal: session.principal(),
                        flags: session.flags(),
                    })?;
                    Ok::<_, Error>(result.into())
                }),
                Access::Authenticated,
            ),
        )
        .add(
            "/admin",
            Route::new(
                routing::handler(|_| async {
                    let mut result = ResultBuilder::new();
                    result.add_success("welcome");
                    Ok::<_, Error>(result.into())
                }),
                Access::Flags(0b100),
            ),
        );
}

#[tokio::test]
async fn cookie_login() {
    let server = ServerBuilder::default().with_routes(routes).run().await;

    let response = server.get("/whoami.json").send().await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED);
    assert_eq!(
        response.headers().get("www-authenticate").unwrap(),
        "Session realm=\"hearth\""
    );
    let cookie = response.headers().get("set-cookie").unwrap().to_str().unwrap();
    assert!(cookie.starts_with("Session="), "{cookie}");
    assert!(cookie.contains("HttpOnly"));

    let response = server.get("/login.json?user=7&flags=1").send().await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    let response = server.get("/whoami.txt").send().await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let text = response.text().await.unwrap();
    assert!(text.contains("principal;flags\n7;1\n"), "{text}");

    // queued extensions of the session don't undo the login
    tokio::time::sleep(Duration::from_millis(200)).await;
    let response = server.get("/whoami.txt").send().await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let text = response.text().await.unwrap();
    assert!(text.contains("principal;flags\n7;1\n"), "{text}");

    let response = server.get("/admin").send().await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::FORBIDDEN);

    let response = server.get("/logout").send().await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    let response = server.get("/whoami").send().await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn header_mode() {
    let server = ServerBuilder::default()
        .http()
        .with_routes(routes)
        .with_options(|options| options.session_mode = SessionMode::Header)
        .run()
        .await;

    let response = server.post("/login?user=3").send().await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert!(response.headers().get("set-cookie").is_none());
    let id = response
        .headers()
        .get("session")
        .unwrap()
        .to_str()
        .unwrap()
        .to_owned();
    assert!(id.parse::<i64>().unwrap() > 0);

    let response = server
        .get("/whoami.txt")
        .header("session", &id)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(response.headers().get("session").unwrap(), id.as_str());

    // another principal can't take over the session
    let response = server
        .get("/login?user=4")
        .header("session", &id)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED);

    // a unknown id gets a new session
    let response = server
        .get("/whoami")
        .header("session", "12345")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED);
    assert_ne!(response.headers().get("session").unwrap(), "12345");
}

#[tokio::test]
async fn without_sessions() {
    let server = ServerBuilder::default()
        .http()
        .with_routes(routes)
        .with_options(|options| options.session_mode = SessionMode::None)
        .run()
        .await;

    let response = server.get("/login?user=1").send().await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED);
    assert!(response.headers().get("set-cookie").is_none());
    assert!(response.headers().get("session").is_none());
}

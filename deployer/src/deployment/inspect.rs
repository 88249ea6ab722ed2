use tokio::sync::mpsc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use whaleray_common::models::deployment::{Deployment, SPRING_PORT};
use whaleray_common::Status;

use super::{record_status, StageContext};
use crate::build::{builder_project, BuildRequest};
use crate::dal::StatusFields;
use crate::error::{Error, Result};
use crate::github::{GithubClient, GithubError, RepoTree};

/// Gradle files whose content carries one of these markers belong to the
/// Spring family.
const SPRING_MARKERS: [&str; 3] = [
    "org.springframework.boot",
    "spring-boot-starter",
    "@SpringBootApplication",
];

const ROOT_DIR: &str = ".";

/// Consumes freshly-accepted deployments and advances each to BUILDING, or
/// to INSPECTING_FAIL when the repository cannot be built.
pub async fn task(mut recv: mpsc::Receiver<Deployment>, context: StageContext) {
    info!("inspect task started");

    while let Some(deployment) = recv.recv().await {
        let context = context.clone();

        tokio::spawn(async move { inspect_one(deployment, &context).await });
    }
}

pub(crate) async fn inspect_one(deployment: Deployment, context: &StageContext) {
    let deployment_id = deployment.deployment_id;

    if let Err(error) = inspect(deployment, context).await {
        inspection_failed(context, &deployment_id, error).await;
    }
}

#[instrument(skip(context, deployment_id, error), fields(deployment_id = %deployment_id, status = %Status::InspectingFail))]
async fn inspection_failed(context: &StageContext, deployment_id: &Uuid, error: Error) {
    error!(
        error = &error as &dyn std::error::Error,
        "repository inspection aborted"
    );

    record_status(
        &context.dal,
        deployment_id,
        Status::InspectingFail,
        StatusFields::error(error.to_string()),
    )
    .await;
}

#[instrument(skip_all, fields(deployment_id = %deployment.deployment_id, status = %Status::Inspecting))]
async fn inspect(deployment: Deployment, context: &StageContext) -> Result<()> {
    // Env material first; its failures are user-addressable
    let env_blob_path = context
        .vault
        .resolve(
            &deployment.user_id,
            &deployment.service_id,
            deployment.env_file_content.as_deref(),
            deployment.is_reset,
        )
        .await?;

    let token = match context
        .github
        .installation_token(deployment.installation_id)
        .await
    {
        Ok(token) => token,
        Err(GithubError::InstallationGone) => {
            // The grant is dead upstream; drop our reference to it
            if let Err(error) = context
                .dal
                .delete_installation(deployment.installation_id)
                .await
            {
                warn!(
                    error = &error as &dyn std::error::Error,
                    "could not evict dead installation"
                );
            }
            return Err(GithubError::InstallationGone.into());
        }
        Err(error) => return Err(error.into()),
    };

    let tree = context
        .github
        .repository_tree(
            &token.token,
            &deployment.repository_full_name,
            &deployment.branch,
        )
        .await?;

    let project = detect_spring_project(&context.github, &token.token, &deployment, &tree).await?;

    let dockerfile = locate_dockerfile(&project.dir, &tree);

    let builder = builder_project(&context.config.project_name, &project.framework)
        .ok_or_else(|| Error::UnsupportedFramework(project.framework.clone()))?;

    let started = context
        .builder
        .start_build(&BuildRequest {
            project: builder,
            deployment_id: deployment.deployment_id,
            repository_full_name: deployment.repository_full_name.clone(),
            branch: deployment.branch.clone(),
            image_uri: format!(
                "{}:{}",
                context.config.ecr_repository_url, deployment.deployment_id
            ),
            env_blob_path,
            source_dir: project.dir.clone(),
            build_context: dockerfile.context,
            dockerfile_path: dockerfile.path,
            has_gradle_wrapper: project.has_wrapper,
        })
        .await?;

    record_status(
        &context.dal,
        &deployment.deployment_id,
        Status::Building,
        StatusFields {
            framework: Some(project.framework),
            codebuild_project: Some(started.project),
            codebuild_log_group: Some(started.log_group),
            codebuild_log_stream: Some(started.log_stream),
            build_id: Some(started.build_id),
            port: Some(SPRING_PORT),
            clear_env: true,
            ..Default::default()
        },
    )
    .await;

    Ok(())
}

/// A gradle project rooted at `dir` (`.` for the repository root).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GradleProject {
    pub dir: String,
    pub gradle_file: String,
    pub has_wrapper: bool,
}

/// The buildable project inspection settled on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpringProject {
    pub framework: String,
    pub dir: String,
    pub has_wrapper: bool,
}

/// Every directory holding a `build.gradle`, in lexicographic order so the
/// first entry is the deterministic pick for multi-project repositories.
pub fn find_gradle_projects(tree: &RepoTree) -> Vec<GradleProject> {
    let mut projects: Vec<_> = tree
        .files
        .iter()
        .filter(|path| *path == "build.gradle" || path.ends_with("/build.gradle"))
        .map(|path| {
            let dir = match path.rsplit_once('/') {
                Some((dir, _)) => dir.to_string(),
                None => ROOT_DIR.to_string(),
            };
            let wrapper = if dir == ROOT_DIR {
                "gradlew".to_string()
            } else {
                format!("{dir}/gradlew")
            };

            GradleProject {
                has_wrapper: tree.contains_file(&wrapper),
                gradle_file: path.clone(),
                dir,
            }
        })
        .collect();

    projects.sort_by(|a, b| a.dir.cmp(&b.dir));

    projects
}

pub fn is_spring_boot(gradle_content: &str) -> bool {
    SPRING_MARKERS
        .iter()
        .any(|marker| gradle_content.contains(marker))
}

pub fn framework_tag(dir: &str) -> String {
    if dir == ROOT_DIR {
        "spring-boot".to_string()
    } else {
        format!("spring-boot:{dir}")
    }
}

/// Frameworks recognized in source but with no builder behind them. Listed
/// so failures can name what was found.
pub fn detect_listed_framework(tree: &RepoTree) -> Option<&'static str> {
    if tree.contains_file("next.config.js") {
        Some("nextjs")
    } else if tree.contains_file("package.json") {
        Some("nodejs")
    } else if tree
        .files
        .iter()
        .any(|path| path.ends_with(".csproj") || path.ends_with(".sln"))
    {
        Some("dotnet")
    } else {
        None
    }
}

async fn detect_spring_project(
    github: &GithubClient,
    token: &str,
    deployment: &Deployment,
    tree: &RepoTree,
) -> Result<SpringProject> {
    let gradle_projects = find_gradle_projects(tree);

    if gradle_projects.is_empty() {
        return Err(match detect_listed_framework(tree) {
            Some(framework) => Error::UnsupportedFramework(framework.to_string()),
            None => Error::NoFramework(deployment.repository_full_name.clone()),
        });
    }

    for project in gradle_projects {
        let content = github
            .file_content(
                token,
                &deployment.repository_full_name,
                &deployment.branch,
                &project.gradle_file,
            )
            .await?;

        if is_spring_boot(&content) {
            return Ok(SpringProject {
                framework: framework_tag(&project.dir),
                dir: project.dir,
                has_wrapper: project.has_wrapper,
            });
        }
    }

    Err(Error::NotSpringBoot)
}

/// Where the Dockerfile lives and what directory to build from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DockerfileLocation {
    /// Unset when the builder should generate one
    pub path: Option<String>,
    pub context: String,
}

/// First match in priority order wins; its parent directory becomes the
/// build context. With no match the builder generates a Dockerfile and the
/// gradle directory is the context.
pub fn locate_dockerfile(gradle_dir: &str, tree: &RepoTree) -> DockerfileLocation {
    for candidate in dockerfile_candidates(gradle_dir) {
        if tree.contains_file(&candidate) {
            let context = match candidate.rsplit_once('/') {
                Some((dir, _)) => dir.to_string(),
                None => ROOT_DIR.to_string(),
            };

            return DockerfileLocation {
                path: Some(candidate),
                context,
            };
        }
    }

    DockerfileLocation {
        path: None,
        context: gradle_dir.to_string(),
    }
}

fn dockerfile_candidates(gradle_dir: &str) -> Vec<String> {
    if gradle_dir == ROOT_DIR {
        [
            "Dockerfile",
            "docker/Dockerfile",
            "src/main/docker/Dockerfile",
            ".docker/Dockerfile",
            "deploy/Dockerfile",
        ]
        .into_iter()
        .map(String::from)
        .collect()
    } else {
        vec![
            format!("{gradle_dir}/Dockerfile"),
            format!("{gradle_dir}/docker/Dockerfile"),
            format!("{gradle_dir}/src/main/docker/Dockerfile"),
            format!("{gradle_dir}/.docker/Dockerfile"),
            "Dockerfile".to_string(),
            "docker/Dockerfile".to_string(),
            "deploy/Dockerfile".to_string(),
        ]
    }
}

#[cfg(test)]
mod stage_tests {
    use serde_json::json;
    use whaleray_common::models::deployment::DEFAULT_PORT;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::test_support::{installation, stage_context_with, TestStage};

    fn inspecting_deployment(env: Option<&str>, is_reset: bool) -> Deployment {
        let mut deployment =
            crate::test_support::built_deployment("u1", "alice", "web", 1_700_000_000);
        deployment.status = Status::Inspecting;
        deployment.port = DEFAULT_PORT;
        deployment.framework = None;
        deployment.codebuild_project = None;
        deployment.codebuild_log_group = None;
        deployment.env_file_content = env.map(str::to_string);
        deployment.is_reset = is_reset;
        deployment
    }

    async fn mount_happy_github(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/app/installations/42/access_tokens"))
            .respond_with(
                ResponseTemplate::new(201).set_body_json(json!({ "token": "ghs_test" })),
            )
            .mount(server)
            .await;

        Mock::given(method("GET"))
            .and(path("/repos/alice/web/git/trees/main"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "tree": [
                    {"path": "build.gradle", "type": "blob"},
                    {"path": "gradlew", "type": "blob"},
                    {"path": "Dockerfile", "type": "blob"},
                    {"path": "src", "type": "tree"},
                ],
                "truncated": false,
            })))
            .mount(server)
            .await;

        // base64 of "plugins { id 'org.springframework.boot' }"
        Mock::given(method("GET"))
            .and(path("/repos/alice/web/contents/build.gradle"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "content": "cGx1Z2lucyB7IGlkICdvcmcuc3ByaW5nZnJhbWV3b3JrLmJvb3QnIH0=",
                "encoding": "base64",
            })))
            .mount(server)
            .await;
    }

    async fn run_inspection(stage: &TestStage, deployment: Deployment) -> Deployment {
        stage
            .dal
            .deployments
            .lock()
            .unwrap()
            .push(deployment.clone());

        inspect_one(deployment, &stage.context).await;

        stage.dal.deployments.lock().unwrap()[0].clone()
    }

    #[tokio::test]
    async fn happy_path_advances_to_building() {
        let server = MockServer::start().await;
        mount_happy_github(&server).await;
        let stage = stage_context_with(Some(server.uri()));

        let row = run_inspection(&stage, inspecting_deployment(Some("FOO=1"), false)).await;

        assert_eq!(row.status, Status::Building);
        assert_eq!(row.framework.as_deref(), Some("spring-boot"));
        assert_eq!(row.port, SPRING_PORT);
        assert_eq!(row.codebuild_project.as_deref(), Some("whaleray-spring-boot"));
        assert_eq!(
            row.codebuild_log_stream.as_deref(),
            Some(row.deployment_id.to_string().as_str())
        );
        assert!(row.build_id.is_some());
        assert_eq!(row.env_file_content, None, "transient env material is dropped");

        let requests = stage.builder.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].project, "whaleray-spring-boot");
        assert_eq!(requests[0].source_dir, ".");
        assert_eq!(requests[0].build_context, ".");
        assert_eq!(requests[0].dockerfile_path.as_deref(), Some("Dockerfile"));
        assert!(requests[0].has_gradle_wrapper);
        assert_eq!(
            requests[0].env_blob_path,
            "/whaleray/u1/u1-alice-web/DOTENV_BLOB"
        );
        assert!(requests[0]
            .image_uri
            .ends_with(&row.deployment_id.to_string()));

        assert_eq!(
            stage
                .params
                .values
                .lock()
                .unwrap()
                .get("/whaleray/u1/u1-alice-web/DOTENV_BLOB")
                .map(String::as_str),
            Some("FOO=1")
        );
    }

    #[tokio::test]
    async fn conflicting_env_flags_fail_inspection() {
        let stage = stage_context_with(None);

        let row = run_inspection(&stage, inspecting_deployment(Some("X=1"), true)).await;

        assert_eq!(row.status, Status::InspectingFail);
        assert!(row
            .error_message
            .as_deref()
            .unwrap()
            .contains("Cannot specify both"));
    }

    #[tokio::test]
    async fn missing_initial_env_fails_inspection() {
        let stage = stage_context_with(None);

        let row = run_inspection(&stage, inspecting_deployment(None, false)).await;

        assert_eq!(row.status, Status::InspectingFail);
        assert!(row
            .error_message
            .as_deref()
            .unwrap()
            .contains("Initial deployment requires env content"));
    }

    #[tokio::test]
    async fn oversized_env_fails_inspection() {
        let stage = stage_context_with(None);
        let oversized = "x".repeat(5000);

        let row = run_inspection(&stage, inspecting_deployment(Some(&oversized), false)).await;

        assert_eq!(row.status, Status::InspectingFail);
        assert!(row.error_message.as_deref().unwrap().contains("4096"));
    }

    #[tokio::test]
    async fn listed_framework_without_builder_fails_with_its_name() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/app/installations/42/access_tokens"))
            .respond_with(
                ResponseTemplate::new(201).set_body_json(json!({ "token": "ghs_test" })),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/alice/web/git/trees/main"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "tree": [{"path": "package.json", "type": "blob"}],
                "truncated": false,
            })))
            .mount(&server)
            .await;
        let stage = stage_context_with(Some(server.uri()));

        let row = run_inspection(&stage, inspecting_deployment(Some("FOO=1"), false)).await;

        assert_eq!(row.status, Status::InspectingFail);
        assert!(row.error_message.as_deref().unwrap().contains("nodejs"));
    }

    #[tokio::test]
    async fn dead_installation_is_evicted_and_inspection_fails() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/app/installations/42/access_tokens"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        let stage = stage_context_with(Some(server.uri()));
        stage
            .dal
            .installations
            .lock()
            .unwrap()
            .push(installation(42, "u1", "alice"));

        let row = run_inspection(&stage, inspecting_deployment(Some("FOO=1"), false)).await;

        assert_eq!(row.status, Status::InspectingFail);
        assert!(stage.dal.installations.lock().unwrap().is_empty());
    }
}
